use crate::chain::{ChatMessage, ChatModel};
use crate::speech::SpeechApi;
use crate::voice::Voice;
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use reqwest::multipart::{Form, Part};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::path::Path;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Deserialize)]
pub struct LlmResponse {
    pub choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
pub struct Choice {
    pub message: Message,
}

#[derive(Debug, Deserialize)]
pub struct Message {
    pub content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Transcription {
    text: String,
}

/// Model names used for each endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiModels {
    pub chat: String,
    pub transcription: String,
    pub speech: String,
}

impl Default for OpenAiModels {
    fn default() -> Self {
        Self {
            chat: "gpt-4o-mini".to_string(),
            transcription: "whisper-1".to_string(),
            speech: "tts-1".to_string(),
        }
    }
}

/// REST client for chat completions, transcription and speech synthesis.
pub struct OpenAiClient {
    client: Client,
    api_key: SecretString,
    base_url: String,
    models: OpenAiModels,
}

impl OpenAiClient {
    pub fn new(api_key: SecretString, models: OpenAiModels) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
            models,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }
}

#[async_trait]
impl ChatModel for OpenAiClient {
    async fn complete(&self, messages: Vec<ChatMessage>, temperature: f32) -> Result<String> {
        let body = serde_json::json!({
            "model": self.models.chat,
            "messages": messages,
            "temperature": temperature,
        });

        let resp = self
            .client
            .post(self.endpoint("chat/completions"))
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .context("Failed to reach chat completions endpoint")?
            .error_for_status()
            .context("Chat completions request was rejected")?
            .json::<LlmResponse>()
            .await
            .context("Failed to parse chat completions response")?;

        resp.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| anyhow!("No response from LLM"))
    }
}

#[async_trait]
impl SpeechApi for OpenAiClient {
    async fn transcribe(&self, audio: &Path) -> Result<String> {
        let bytes = tokio::fs::read(audio)
            .await
            .with_context(|| format!("Failed to read audio clip: {}", audio.display()))?;
        tracing::debug!("Uploading {} bytes for transcription", bytes.len());

        let file = Part::bytes(bytes)
            .file_name("audio.wav")
            .mime_str("audio/wav")?;
        let form = Form::new()
            .text("model", self.models.transcription.clone())
            .text("language", "en")
            .part("file", file);

        let transcription = self
            .client
            .post(self.endpoint("audio/transcriptions"))
            .bearer_auth(self.api_key.expose_secret())
            .multipart(form)
            .send()
            .await
            .context("Failed to reach transcription endpoint")?
            .error_for_status()
            .context("Transcription request was rejected")?
            .json::<Transcription>()
            .await
            .context("Failed to parse transcription response")?;
        Ok(transcription.text)
    }

    async fn synthesize(&self, text: &str, voice: Voice) -> Result<Vec<u8>> {
        let body = serde_json::json!({
            "model": self.models.speech,
            "input": text,
            "voice": voice,
            "response_format": "pcm",
        });

        let audio = self
            .client
            .post(self.endpoint("audio/speech"))
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .context("Failed to reach speech endpoint")?
            .error_for_status()
            .context("Speech request was rejected")?
            .bytes()
            .await
            .context("Failed to read synthesized audio")?;
        Ok(audio.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_response_parses_null_content() {
        let raw = r#"{"choices": [{"message": {"role": "assistant", "content": null}}]}"#;

        let parsed: LlmResponse = serde_json::from_str(raw).unwrap();

        assert!(parsed.choices[0].message.content.is_none());
    }

    #[test]
    fn test_messages_serialize_with_lowercase_roles() {
        let body = serde_json::json!({ "messages": vec![ChatMessage::system("s"), ChatMessage::user("u")] });

        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "u");
        assert_eq!(serde_json::json!(Voice::Echo), "echo");
    }

    #[test]
    fn test_base_url_trailing_slash_is_trimmed() {
        let client = OpenAiClient::new(SecretString::from("sk-test".to_string()), OpenAiModels::default())
            .with_base_url("http://localhost:8080/v1/");

        assert_eq!(client.endpoint("audio/speech"), "http://localhost:8080/v1/audio/speech");
    }
}
