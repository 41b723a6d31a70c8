//! HTTP client for a Gemini-style `generateContent` endpoint.
//!
//! Images travel base64-encoded as `inlineData` parts. The generation call
//! returns the first image part of the first candidate; the analysis call
//! asks for JSON and parses the concatenated text parts.

use std::time::Duration;

use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::error::{log_remote_error, RemoteError};
use crate::remote::{GenerationRequest, SheetAnalyzer, SpriteGenerator, ANALYSIS_INSTRUCTION};
use crate::sprite::analysis::{parse_analysis_text, SpriteSheetAnalysis};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_IMAGE_MODEL: &str = "gemini-2.5-flash-image";
pub const DEFAULT_TEXT_MODEL: &str = "gemini-2.5-flash";
/// Environment variable holding the API key
pub const API_KEY_ENV: &str = "SPRITE_LIPSYNC_API_KEY";

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        RemoteError::Transport {
            reason: err.to_string(),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData<'a> {
    mime_type: &'a str,
    data: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
enum RequestPart<'a> {
    Text(&'a str),
    InlineData(InlineData<'a>),
}

#[derive(Serialize)]
struct RequestContent<'a> {
    parts: Vec<RequestPart<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    response_modalities: Option<Vec<&'static str>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<&'static str>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateBody<'a> {
    contents: Vec<RequestContent<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponseInlineData {
    #[serde(default)]
    mime_type: String,
    data: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    inline_data: Option<ResponseInlineData>,
}

#[derive(Debug, Default, Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Default, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: ResponseContent,
}

#[derive(Debug, Default, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

impl GenerateResponse {
    fn parts(&self) -> impl Iterator<Item = &ResponsePart> + '_ {
        self.candidates
            .first()
            .into_iter()
            .flat_map(|candidate| candidate.content.parts.iter())
    }

    /// Decoded bytes of the first image part.
    fn first_image(&self) -> Result<Vec<u8>, RemoteError> {
        let inline = self
            .parts()
            .find_map(|part| part.inline_data.as_ref())
            .ok_or(RemoteError::MissingImage)?;
        log::debug!("[RemoteClient] image part {} ({} b64 chars)", inline.mime_type, inline.data.len());
        base64::engine::general_purpose::STANDARD
            .decode(inline.data.as_bytes())
            .map_err(|_| RemoteError::MissingImage)
    }

    fn text(&self) -> String {
        self.parts().filter_map(|part| part.text.as_deref()).collect()
    }
}

pub struct HttpRemoteClient {
    client: reqwest::Client,
    base_url: String,
    image_model: String,
    text_model: String,
    api_key: String,
}

impl HttpRemoteClient {
    pub fn new(api_key: impl Into<String>) -> Result<Self, RemoteError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(RemoteError::MissingCredentials);
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(180))
            .build()?;
        Ok(Self {
            client,
            base_url: DEFAULT_BASE_URL.to_string(),
            image_model: DEFAULT_IMAGE_MODEL.to_string(),
            text_model: DEFAULT_TEXT_MODEL.to_string(),
            api_key,
        })
    }

    /// Read the key from [`API_KEY_ENV`].
    pub fn from_env() -> Result<Self, RemoteError> {
        let key = std::env::var(API_KEY_ENV).map_err(|_| RemoteError::MissingCredentials)?;
        Self::new(key)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_models(mut self, image_model: impl Into<String>, text_model: impl Into<String>) -> Self {
        self.image_model = image_model.into();
        self.text_model = text_model.into();
        self
    }

    async fn generate_content(&self, model: &str, body: &GenerateBody<'_>) -> Result<GenerateResponse, RemoteError> {
        let url = format!("{}/models/{}:generateContent", self.base_url, model);
        let resp = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(RemoteError::Status {
                status: status.as_u16(),
                body,
            });
        }
        let text = resp.text().await?;
        Ok(serde_json::from_str(&text)?)
    }
}

fn encode_image<'a>(bytes: &[u8], mime: &'a str) -> RequestPart<'a> {
    RequestPart::InlineData(InlineData {
        mime_type: mime,
        data: base64::engine::general_purpose::STANDARD.encode(bytes),
    })
}

impl SpriteGenerator for HttpRemoteClient {
    async fn generate(&self, request: &GenerationRequest) -> Result<Vec<u8>, RemoteError> {
        let body = GenerateBody {
            contents: vec![RequestContent {
                parts: vec![
                    encode_image(&request.reference, &request.reference_mime),
                    RequestPart::Text(&request.instruction),
                ],
            }],
            generation_config: GenerationConfig {
                response_modalities: Some(vec!["IMAGE", "TEXT"]),
                response_mime_type: None,
            },
        };
        log::info!("[RemoteClient] generating {:?} sheet with {}", request.kind, self.image_model);
        let result = self
            .generate_content(&self.image_model, &body)
            .await
            .and_then(|response| response.first_image());
        if let Err(err) = &result {
            log_remote_error(err, "generate");
        }
        result
    }
}

impl SheetAnalyzer for HttpRemoteClient {
    async fn analyze(&self, sheet: &[u8], sheet_mime: &str, frame_count: usize) -> Result<SpriteSheetAnalysis, RemoteError> {
        let body = GenerateBody {
            contents: vec![RequestContent {
                parts: vec![encode_image(sheet, sheet_mime), RequestPart::Text(ANALYSIS_INSTRUCTION)],
            }],
            generation_config: GenerationConfig {
                response_modalities: None,
                response_mime_type: Some("application/json"),
            },
        };
        log::info!("[RemoteClient] analyzing sheet with {}", self.text_model);
        let result = self
            .generate_content(&self.text_model, &body)
            .await
            .and_then(|response| parse_analysis_text(&response.text(), frame_count));
        if let Err(err) = &result {
            log_remote_error(err, "analyze");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn response(value: serde_json::Value) -> GenerateResponse {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_first_image_decodes_inline_data() {
        let resp = response(json!({
            "candidates": [{"content": {"parts": [
                {"text": "here you go"},
                {"inlineData": {"mimeType": "image/png", "data": "AQID"}}
            ]}}]
        }));
        assert_eq!(resp.first_image().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_text_only_response_is_missing_image() {
        let resp = response(json!({
            "candidates": [{"content": {"parts": [{"text": "I cannot draw that"}]}}]
        }));
        assert_eq!(resp.first_image(), Err(RemoteError::MissingImage));
        assert_eq!(response(json!({})).first_image(), Err(RemoteError::MissingImage));
    }

    #[test]
    fn test_text_parts_concatenate() {
        let resp = response(json!({
            "candidates": [{"content": {"parts": [{"text": "{\"frames\":"}, {"text": "[]}"}]}}]
        }));
        let analysis = parse_analysis_text(&resp.text(), 16).unwrap();
        assert!(analysis.frames.is_empty());
    }

    #[test]
    fn test_request_body_shape() {
        let body = GenerateBody {
            contents: vec![RequestContent {
                parts: vec![encode_image(&[1, 2, 3], "image/png"), RequestPart::Text("hi")],
            }],
            generation_config: GenerationConfig {
                response_modalities: None,
                response_mime_type: Some("application/json"),
            },
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["contents"][0]["parts"][0]["inlineData"]["data"], "AQID");
        assert_eq!(value["contents"][0]["parts"][1]["text"], "hi");
        assert_eq!(value["generationConfig"]["responseMimeType"], "application/json");
        assert!(value["generationConfig"].get("responseModalities").is_none());
    }

    #[test]
    fn test_empty_key_is_missing_credentials() {
        assert!(matches!(HttpRemoteClient::new("  "), Err(RemoteError::MissingCredentials)));
    }
}
