//! Vision-language reasoning client.
//!
//! Talks to an external chat-completions endpoint. The prompt contract pins
//! a strict JSON reply; a malformed reply gets exactly one stricter re-prompt
//! before the reasoning slot is marked skipped. Endpoint unreachability is
//! retried with exponential backoff (1s, 2s, 4s) before giving up.

use std::path::Path;
use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use vab_models::{Narrative, Reasoning, SceneEntry, ShotAnalysis};

use crate::error::{WorkerError, WorkerResult};
use crate::retry::{retry_async, RetryConfig};

const SHOT_SYSTEM: &str = "You are a precise video analyst. Return STRICT JSON only with keys: \
summary, mood, intent, composition_notes, transition_guess.\n\n\
Example response:\n\
{\"summary\": \"Close-up of person speaking directly to camera\", \"mood\": \"professional\", \
\"intent\": \"direct_address\", \"composition_notes\": [\"centered framing\"], \
\"transition_guess\": \"cut\"}\n\n\
Do not include any text outside the JSON object.";

const SHOT_SYSTEM_STRICT: &str = "Return ONLY a JSON object with exactly these keys and no other \
text: summary (string), mood (string), intent (string), composition_notes (array of strings), \
transition_guess (string). No markdown, no code fences, no commentary.";

const SCENE_SYSTEM: &str = "You are a precise scene analyst. Return STRICT JSON only with keys: \
narrative_function, tone, motifs, risks.\n\nDo not include any text outside the JSON object.";

/// VL endpoint configuration.
#[derive(Debug, Clone)]
pub struct VlConfig {
    pub api_base: String,
    pub api_key: String,
    pub model: String,
    pub timeout: Duration,
}

impl VlConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            api_base: std::env::var("VL_API_BASE")
                .unwrap_or_else(|_| "http://localhost:8000/v1".to_string()),
            api_key: std::env::var("VL_API_KEY").unwrap_or_else(|_| "EMPTY".to_string()),
            model: std::env::var("VL_MODEL")
                .unwrap_or_else(|_| "Qwen/Qwen2.5-VL-7B-Instruct".to_string()),
            timeout: Duration::from_secs(
                std::env::var("VL_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(60),
            ),
        }
    }
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<Message>,
    max_tokens: u32,
    temperature: f64,
}

#[derive(Serialize)]
struct Message {
    role: &'static str,
    content: serde_json::Value,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: String,
}

/// Chat-completions client for the VL collaborator.
pub struct VlClient {
    config: VlConfig,
    client: Client,
}

impl VlClient {
    pub fn new(config: VlConfig) -> Self {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_default();
        Self { config, client }
    }

    pub fn from_env() -> Self {
        Self::new(VlConfig::from_env())
    }

    /// Model identifier, for provenance.
    pub fn model(&self) -> &str {
        &self.config.model
    }

    /// Lightweight reachability probe for the health endpoint.
    pub async fn available(&self) -> bool {
        let url = format!("{}/models", self.config.api_base.trim_end_matches('/'));
        match self.client.get(&url).timeout(Duration::from_secs(5)).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    /// Analyze one shot: sampled frames plus a detector summary go in, a
    /// strict [`Reasoning`] object comes out.
    ///
    /// Call semantics: up to 3 attempts with 1s/2s/4s backoff when the
    /// endpoint is unreachable; one stricter re-prompt when the reply does
    /// not parse.
    pub async fn analyze_shot(
        &self,
        shot: &ShotAnalysis,
        frame_paths: &[std::path::PathBuf],
    ) -> WorkerResult<Reasoning> {
        let user_prompt = build_shot_prompt(shot);

        let reply = self
            .call_with_backoff(SHOT_SYSTEM, &user_prompt, frame_paths)
            .await?;

        match parse_reasoning(&reply) {
            Ok(reasoning) => Ok(reasoning),
            Err(first_err) => {
                warn!(
                    shot = %shot.shot_id,
                    error = %first_err,
                    "VL reply did not parse, re-prompting strictly"
                );
                let reply = self
                    .call_with_backoff(SHOT_SYSTEM_STRICT, &user_prompt, frame_paths)
                    .await?;
                parse_reasoning(&reply).map_err(|e| WorkerError::VlParse(e.to_string()))
            }
        }
    }

    /// Scene-level narrative from the shot summaries.
    pub async fn analyze_scene(
        &self,
        scene: &SceneEntry,
        shots: &[&ShotAnalysis],
    ) -> WorkerResult<Narrative> {
        let user_prompt = build_scene_prompt(scene, shots);
        let reply = self.call_with_backoff(SCENE_SYSTEM, &user_prompt, &[]).await?;
        parse_json_reply::<Narrative>(&reply)
            .map_err(|e| WorkerError::vl(format!("narrative parse failed: {}", e)))
    }

    async fn call_with_backoff(
        &self,
        system: &str,
        user: &str,
        frame_paths: &[std::path::PathBuf],
    ) -> WorkerResult<String> {
        let retry = RetryConfig::new("vl_chat")
            .with_max_retries(2)
            .with_base_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(4));

        retry_async(&retry, || self.call_once(system, user, frame_paths))
            .await
            .into_result()
    }

    async fn call_once(
        &self,
        system: &str,
        user: &str,
        frame_paths: &[std::path::PathBuf],
    ) -> WorkerResult<String> {
        let url = format!(
            "{}/chat/completions",
            self.config.api_base.trim_end_matches('/')
        );

        let user_content = if frame_paths.is_empty() {
            serde_json::Value::String(user.to_string())
        } else {
            let mut parts = vec![serde_json::json!({"type": "text", "text": user})];
            for path in frame_paths {
                match encode_image_base64(path) {
                    Ok(b64) => parts.push(serde_json::json!({
                        "type": "image_url",
                        "image_url": {"url": format!("data:image/jpeg;base64,{}", b64)}
                    })),
                    Err(e) => warn!(path = %path.display(), "failed to encode frame: {}", e),
                }
            }
            serde_json::Value::Array(parts)
        };

        let request = ChatRequest {
            model: self.config.model.clone(),
            messages: vec![
                Message {
                    role: "system",
                    content: serde_json::Value::String(system.to_string()),
                },
                Message {
                    role: "user",
                    content: user_content,
                },
            ],
            max_tokens: 512,
            temperature: 0.1,
        };

        debug!(url = %url, frames = frame_paths.len(), "VL request");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| WorkerError::vl(format!("VL request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(WorkerError::vl(format!("VL returned {}: {}", status, body)));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| WorkerError::vl(format!("VL response decode failed: {}", e)))?;

        parsed
            .choices
            .first()
            .map(|c| c.message.content.clone())
            .ok_or_else(|| WorkerError::vl("no choices in VL response"))
    }
}

fn encode_image_base64(path: &Path) -> std::io::Result<String> {
    let bytes = std::fs::read(path)?;
    Ok(base64_encode(&bytes))
}

// Standard base64 alphabet, unpadded input handled by chunking.
fn base64_encode(bytes: &[u8]) -> String {
    const ALPHABET: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
    let mut out = String::with_capacity((bytes.len() + 2) / 3 * 4);
    for chunk in bytes.chunks(3) {
        let b = [chunk[0], *chunk.get(1).unwrap_or(&0), *chunk.get(2).unwrap_or(&0)];
        let n = ((b[0] as u32) << 16) | ((b[1] as u32) << 8) | b[2] as u32;
        out.push(ALPHABET[(n >> 18) as usize & 63] as char);
        out.push(ALPHABET[(n >> 12) as usize & 63] as char);
        out.push(if chunk.len() > 1 {
            ALPHABET[(n >> 6) as usize & 63] as char
        } else {
            '='
        });
        out.push(if chunk.len() > 2 {
            ALPHABET[n as usize & 63] as char
        } else {
            '='
        });
    }
    out
}

/// Build the shot prompt from detector outputs.
fn build_shot_prompt(shot: &ShotAnalysis) -> String {
    let d = &shot.detectors;
    let objects: Vec<&str> = d.objects.iter().map(|o| o.label.as_str()).take(10).collect();
    let texts: Vec<&str> = d
        .text
        .iter()
        .map(|t| t.text.as_str())
        .filter(|t| !t.is_empty())
        .take(5)
        .collect();
    let (brightness, saturation) = d
        .color
        .as_ref()
        .map(|c| (c.brightness, c.saturation))
        .unwrap_or((0.5, 0.5));
    let motion_type = d
        .motion
        .as_ref()
        .map(|m| m.motion_type.as_str())
        .unwrap_or("static");

    format!(
        "Analyze this video shot and return JSON.\n\n\
         Shot ID: {}\nDuration: {:.2}s\nFrame count: {}\n\n\
         Detected objects: {}\n\
         Detected faces: {}\n\
         Detected text: {}\n\
         Color info: brightness={:.2}, saturation={:.2}\n\
         Motion: {}\n\n\
         Provide JSON analysis following the format specified in the system prompt.",
        shot.shot_id,
        shot.duration_s,
        shot.frame_count,
        if objects.is_empty() {
            "none".to_string()
        } else {
            objects.join(", ")
        },
        if d.faces.is_empty() {
            "none".to_string()
        } else {
            format!("{} face(s)", d.faces.len())
        },
        if texts.is_empty() {
            "none".to_string()
        } else {
            texts.join(", ")
        },
        brightness,
        saturation,
        motion_type,
    )
}

/// Build the scene prompt from shot summaries.
fn build_scene_prompt(scene: &SceneEntry, shots: &[&ShotAnalysis]) -> String {
    let summaries: Vec<String> = shots
        .iter()
        .map(|s| {
            format!(
                "- {}: {}",
                s.shot_id,
                if s.summary.is_empty() {
                    "No summary available"
                } else {
                    &s.summary
                }
            )
        })
        .collect();

    format!(
        "Analyze this scene and return JSON.\n\n\
         Scene ID: {}\nDuration: {:.2}s\nNumber of shots: {}\n\n\
         Shot summaries:\n{}\n\n\
         Provide JSON analysis following the format specified in the system prompt.",
        scene.scene_id,
        scene.features.total_duration_s,
        scene.features.shot_count,
        summaries.join("\n"),
    )
}

/// Strictly parse a reasoning reply, tolerating markdown code fences.
pub fn parse_reasoning(reply: &str) -> Result<Reasoning, serde_json::Error> {
    parse_json_reply(reply)
}

fn parse_json_reply<T: serde::de::DeserializeOwned>(reply: &str) -> Result<T, serde_json::Error> {
    let text = strip_code_fences(reply.trim());
    serde_json::from_str(text)
}

fn strip_code_fences(text: &str) -> &str {
    let text = text
        .strip_prefix("```json")
        .or_else(|| text.strip_prefix("```"))
        .unwrap_or(text);
    text.strip_suffix("```").unwrap_or(text).trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_json_reply() {
        let reply = r#"{"summary": "Wide city shot", "mood": "calm", "intent": "establishing",
                        "composition_notes": ["skyline"], "transition_guess": "cut"}"#;
        let r = parse_reasoning(reply).unwrap();
        assert_eq!(r.summary, "Wide city shot");
        assert_eq!(r.composition_notes, vec!["skyline"]);
    }

    #[test]
    fn parses_fenced_json_reply() {
        let reply = "```json\n{\"summary\": \"s\", \"mood\": \"m\", \"intent\": \"i\", \
                     \"composition_notes\": [], \"transition_guess\": \"none\"}\n```";
        let r = parse_reasoning(reply).unwrap();
        assert_eq!(r.mood, "m");
    }

    #[test]
    fn rejects_prose_reply() {
        assert!(parse_reasoning("Sure! Here is the analysis you asked for.").is_err());
    }

    #[test]
    fn missing_optional_arrays_default() {
        let reply = r#"{"summary": "s", "mood": "m", "intent": "i"}"#;
        let r = parse_reasoning(reply).unwrap();
        assert!(r.composition_notes.is_empty());
        assert_eq!(r.transition_guess, "");
    }

    #[test]
    fn base64_known_vectors() {
        assert_eq!(base64_encode(b""), "");
        assert_eq!(base64_encode(b"f"), "Zg==");
        assert_eq!(base64_encode(b"fo"), "Zm8=");
        assert_eq!(base64_encode(b"foo"), "Zm9v");
        assert_eq!(base64_encode(b"foobar"), "Zm9vYmFy");
    }

    #[test]
    fn shot_prompt_includes_detector_summary() {
        use vab_models::{ShotAnalysis, ShotDetectors};
        let shot = ShotAnalysis {
            shot_id: "sh_000".to_string(),
            start_frame: 0,
            end_frame: 30,
            frame_count: 30,
            duration_s: 1.0,
            detectors: ShotDetectors::default(),
            summary: String::new(),
            mood: String::new(),
            intent: String::new(),
            composition_notes: Vec::new(),
            transition_guess: String::new(),
        };
        let prompt = build_shot_prompt(&shot);
        assert!(prompt.contains("sh_000"));
        assert!(prompt.contains("Detected objects: none"));
        assert!(prompt.contains("Motion: static"));
    }
}
