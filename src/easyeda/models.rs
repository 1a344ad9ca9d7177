//! Wire types of the EasyEDA component endpoint.

use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Deserialize)]
pub struct ApiResponse {
    #[serde(default)]
    pub success: bool,
    pub result: Option<ApiResult>,
}

#[derive(Debug, Deserialize)]
pub struct ApiResult {
    pub title: Option<String>,
    #[serde(rename = "dataStr")]
    pub data_str: Option<Value>,
    #[serde(rename = "packageDetail")]
    pub package_detail: Option<Value>,
    pub lcsc: Option<Value>,
}

/// Everything the builder needs, extracted and validated from one
/// endpoint response.
#[derive(Debug, Clone)]
pub struct ComponentData {
    pub lcsc_id: String,
    pub title: String,
    /// Reference designator prefix, e.g. `U` or `R`.
    pub prefix: String,
    /// Tilde-separated symbol shape records.
    pub symbol_shapes: Vec<String>,
    /// Symbol coordinate origin from the document head.
    pub symbol_origin: (f64, f64),
    /// Tilde-separated footprint shape records.
    pub footprint_shapes: Vec<String>,
    pub footprint_origin: (f64, f64),
    pub manufacturer: String,
    pub datasheet: String,
    pub model_3d: Option<Model3dInfo>,
}

#[derive(Debug, Clone)]
pub struct Model3dInfo {
    pub uuid: String,
    pub title: String,
}
