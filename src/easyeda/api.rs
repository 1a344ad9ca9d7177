//! HTTP client for the EasyEDA component and 3D-model endpoints.

use std::time::Duration;

use reqwest::{Client, StatusCode};

use crate::easyeda::models::{ApiResponse, ComponentData, Model3dInfo};
use crate::error::{ImportError, Result};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const RETRY_DELAY: Duration = Duration::from_millis(500);

pub struct EasyedaApi {
    client: Client,
    api_base: String,
    models_base: String,
}

impl EasyedaApi {
    pub fn new() -> Self {
        Self::with_base_urls("https://easyeda.com", "https://modules.easyeda.com")
    }

    /// Point the client at alternative endpoints (used by tests).
    pub fn with_base_urls(api_base: impl Into<String>, models_base: impl Into<String>) -> Self {
        Self {
            client: Client::builder()
                .user_agent(concat!("kimport/", env!("CARGO_PKG_VERSION")))
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
            api_base: api_base.into(),
            models_base: models_base.into(),
        }
    }

    /// Fetch and validate the component record for one LCSC identifier.
    pub async fn get_component_data(&self, lcsc_id: &str) -> Result<ComponentData> {
        let url = format!(
            "{}/api/products/{}/components?version=6.4.19.5",
            self.api_base, lcsc_id
        );

        log::info!("fetching component data for {lcsc_id}");
        let response = self.get_with_retry(&url, lcsc_id).await?;

        let api_response: ApiResponse = response
            .json()
            .await
            .map_err(|e| ImportError::RemoteUnavailable(format!("malformed response: {e}")))?;

        if !api_response.success {
            return Err(ImportError::RemoteNotFound(lcsc_id.to_string()));
        }
        let result = api_response
            .result
            .ok_or_else(|| ImportError::RemoteNotFound(lcsc_id.to_string()))?;

        let title = result
            .title
            .ok_or_else(|| ImportError::RemoteUnavailable("missing title field".into()))?;
        let data_str = result
            .data_str
            .ok_or_else(|| ImportError::RemoteUnavailable("missing dataStr field".into()))?;

        let symbol_origin = head_origin(&data_str);
        let symbol_shapes = shape_array(&data_str);
        let prefix = data_str
            .get("head")
            .and_then(|h| h.get("c_para"))
            .and_then(|cp| cp.get("pre"))
            .and_then(|v| v.as_str())
            .unwrap_or("U")
            .trim_end_matches('?')
            .to_string();
        let manufacturer = data_str
            .get("head")
            .and_then(|h| h.get("c_para"))
            .and_then(|cp| cp.get("BOM_Manufacturer"))
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();
        let datasheet = result
            .lcsc
            .as_ref()
            .and_then(|l| l.get("url"))
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();

        let (footprint_shapes, footprint_origin, model_3d) = match &result.package_detail {
            Some(pkg) => {
                let data = pkg.get("dataStr").unwrap_or(pkg);
                let shapes = shape_array(data);
                let model = extract_3d_model(&shapes);
                (shapes, head_origin(data), model)
            }
            None => (Vec::new(), (0.0, 0.0), None),
        };

        Ok(ComponentData {
            lcsc_id: lcsc_id.to_string(),
            title,
            prefix,
            symbol_shapes,
            symbol_origin,
            footprint_shapes,
            footprint_origin,
            manufacturer,
            datasheet,
            model_3d,
        })
    }

    /// Download the STEP asset for a model UUID.
    pub async fn download_3d_step(&self, uuid: &str) -> Result<Vec<u8>> {
        let url = format!("{}/qAxj6KHrDKw4blvCG8QJPs7Y/{}", self.models_base, uuid);
        log::info!("downloading 3D model {uuid}");
        let response = self.get_with_retry(&url, uuid).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ImportError::RemoteUnavailable(format!("model download: {e}")))?;
        Ok(bytes.to_vec())
    }

    /// One GET with at most one retry on transport errors or server-side
    /// failures. Client-side rejections are final.
    async fn get_with_retry(&self, url: &str, what: &str) -> Result<reqwest::Response> {
        for attempt in 0..2 {
            if attempt > 0 {
                log::warn!("retrying request for {what}");
                tokio::time::sleep(RETRY_DELAY).await;
            }
            match self.client.get(url).send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response);
                    }
                    if status == StatusCode::NOT_FOUND {
                        return Err(ImportError::RemoteNotFound(what.to_string()));
                    }
                    if status.is_client_error() {
                        return Err(ImportError::RemoteUnavailable(format!(
                            "{what}: request rejected with {status}"
                        )));
                    }
                    if attempt > 0 {
                        return Err(ImportError::RemoteUnavailable(format!(
                            "{what}: server responded {status}"
                        )));
                    }
                }
                Err(e) => {
                    if attempt > 0 {
                        return Err(ImportError::RemoteUnavailable(format!("{what}: {e}")));
                    }
                }
            }
        }
        unreachable!()
    }
}

impl Default for EasyedaApi {
    fn default() -> Self {
        Self::new()
    }
}

fn head_origin(data: &serde_json::Value) -> (f64, f64) {
    let x = data
        .get("head")
        .and_then(|h| h.get("x"))
        .and_then(|v| v.as_f64())
        .unwrap_or(0.0);
    let y = data
        .get("head")
        .and_then(|h| h.get("y"))
        .and_then(|v| v.as_f64())
        .unwrap_or(0.0);
    (x, y)
}

fn shape_array(data: &serde_json::Value) -> Vec<String> {
    data.get("shape")
        .and_then(|v| v.as_array())
        .map(|shapes| {
            shapes
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

/// The 3D model reference hides in an `SVGNODE` shape whose attributes
/// carry `c_etype: outline3D` plus the model UUID.
fn extract_3d_model(shapes: &[String]) -> Option<Model3dInfo> {
    for shape in shapes {
        let Some(payload) = shape.strip_prefix("SVGNODE~") else {
            continue;
        };
        let Ok(svg) = serde_json::from_str::<serde_json::Value>(
            payload.split('~').next().unwrap_or(payload),
        ) else {
            continue;
        };
        let Some(attrs) = svg.get("attrs") else {
            continue;
        };
        if attrs.get("c_etype").and_then(|v| v.as_str()) != Some("outline3D") {
            continue;
        }
        let uuid = attrs.get("uuid").and_then(|v| v.as_str());
        let title = attrs.get("title").and_then(|v| v.as_str());
        if let (Some(uuid), Some(title)) = (uuid, title) {
            return Some(Model3dInfo {
                uuid: uuid.to_string(),
                title: title.to_string(),
            });
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn component_body() -> String {
        serde_json::json!({
            "success": true,
            "result": {
                "title": "NE555DR",
                "dataStr": {
                    "head": {"x": 400.0, "y": 300.0, "c_para": {"pre": "U?", "BOM_Manufacturer": "TI"}},
                    "shape": ["P~show~0~1~470~-10~180~gge23~0^^470~-10^^M 470 -10 h -20~#880000^^1~445~-13~0~GND~end~~~#0000FF^^1~458~-9~0~1~start~~~#0000FF^^0~453~-10^^0~M 450 -7 L 447 -10 L 450 -13"]
                },
                "packageDetail": {
                    "dataStr": {
                        "head": {"x": 4000.0, "y": 3000.0},
                        "shape": [
                            "PAD~RECT~4010~3000~6~3~1~~1~0~~0~gge1~0~~Y",
                            "SVGNODE~{\"attrs\":{\"c_etype\":\"outline3D\",\"uuid\":\"abc123\",\"title\":\"SOIC-8\"}}"
                        ]
                    }
                },
                "lcsc": {"url": "https://lcsc.com/ds.pdf"}
            }
        })
        .to_string()
    }

    #[tokio::test]
    async fn parses_component_response() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/products/C7593/components")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_body(component_body())
            .create_async()
            .await;

        let api = EasyedaApi::with_base_urls(server.url(), server.url());
        let data = api.get_component_data("C7593").await.unwrap();
        mock.assert_async().await;

        assert_eq!(data.title, "NE555DR");
        assert_eq!(data.prefix, "U");
        assert_eq!(data.symbol_origin, (400.0, 300.0));
        assert_eq!(data.symbol_shapes.len(), 1);
        assert_eq!(data.footprint_shapes.len(), 2);
        assert_eq!(data.manufacturer, "TI");
        let model = data.model_3d.unwrap();
        assert_eq!(model.uuid, "abc123");
        assert_eq!(model.title, "SOIC-8");
    }

    #[tokio::test]
    async fn missing_part_is_not_found() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", mockito::Matcher::Any)
            .with_status(200)
            .with_body(r#"{"success": false}"#)
            .create_async()
            .await;

        let api = EasyedaApi::with_base_urls(server.url(), server.url());
        let err = api.get_component_data("C0000").await.unwrap_err();
        assert!(matches!(err, ImportError::RemoteNotFound(_)));
    }

    #[tokio::test]
    async fn http_404_is_not_found() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", mockito::Matcher::Any)
            .with_status(404)
            .create_async()
            .await;

        let api = EasyedaApi::with_base_urls(server.url(), server.url());
        let err = api.get_component_data("C1").await.unwrap_err();
        assert!(matches!(err, ImportError::RemoteNotFound(_)));
    }

    #[tokio::test]
    async fn server_error_is_retried_once_then_surfaces() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", mockito::Matcher::Any)
            .with_status(503)
            .expect(2)
            .create_async()
            .await;

        let api = EasyedaApi::with_base_urls(server.url(), server.url());
        let err = api.get_component_data("C1").await.unwrap_err();
        assert!(matches!(err, ImportError::RemoteUnavailable(_)));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn downloads_step_bytes() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/qAxj6KHrDKw4blvCG8QJPs7Y/abc")
            .with_status(200)
            .with_body("ISO-10303-21;")
            .create_async()
            .await;

        let api = EasyedaApi::with_base_urls(server.url(), server.url());
        let bytes = api.download_3d_step("abc").await.unwrap();
        assert_eq!(bytes, b"ISO-10303-21;");
        mock.assert_async().await;
    }
}
