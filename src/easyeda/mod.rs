//! Remote part acquisition from the EasyEDA service.
//!
//! The fetcher produces the same raw-part records as the archive parsers,
//! so everything downstream of the canonical builder is shared.

pub mod api;
pub mod builder;
pub mod models;

pub use api::EasyedaApi;

use crate::error::Result;
use crate::parsers::RawPart;

/// Fetch one component by LCSC identifier. A missing 3D model is not an
/// error; a missing component or unreachable service is.
pub async fn fetch_part(api: &EasyedaApi, lcsc_id: &str) -> Result<RawPart> {
    let data = api.get_component_data(lcsc_id).await?;
    log::info!("fetched component {} ({})", data.title, lcsc_id);

    let model_bytes = match &data.model_3d {
        Some(info) => match api.download_3d_step(&info.uuid).await {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                log::warn!("3D model for {lcsc_id} unavailable: {e}");
                None
            }
        },
        None => None,
    };

    builder::to_raw_part(&data, model_bytes)
}
