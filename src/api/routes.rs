use crate::core::models::{InputType, RouteConfig};

pub const CHAT_PATH: &str = "/chat";
pub const MINUTE_WRITER_PATH: &str = "/minute-writer/process";

/// Multipart field carrying the meeting recording.
pub const UPLOAD_FIELD: &str = "audio_file";

/// Audio extensions accepted by the minute writer (lowercase, no dot).
pub const AUDIO_EXTENSIONS: [&str; 3] = ["mp3", "wav", "m4a"];

/// Returns the file's extension if it is a supported audio format.
///
/// The comparison ignores case; the extension is returned as written.
pub fn supported_audio_extension(file_name: &str) -> Option<&str> {
    let (stem, ext) = file_name.rsplit_once('.')?;
    // ".mp3" alone is a hidden file, not an mp3
    if stem.is_empty() {
        return None;
    }
    AUDIO_EXTENSIONS
        .iter()
        .any(|a| a.eq_ignore_ascii_case(ext))
        .then_some(ext)
}

/// Routes published on `GET /routes` for discovery by clients.
pub fn route_catalog() -> Vec<RouteConfig> {
    vec![
        RouteConfig {
            endpoint: "/".to_string(),
            method: "GET".to_string(),
            input_type: InputType::None,
            description: "Welcome message".to_string(),
            accepted_files: Vec::new(),
            required_params: Vec::new(),
        },
        RouteConfig {
            endpoint: "/health".to_string(),
            method: "GET".to_string(),
            input_type: InputType::None,
            description: "Health check".to_string(),
            accepted_files: Vec::new(),
            required_params: Vec::new(),
        },
        RouteConfig {
            endpoint: CHAT_PATH.to_string(),
            method: "POST".to_string(),
            input_type: InputType::Text,
            description: "Chat with the AI assistant (streamed as server-sent events)".to_string(),
            accepted_files: Vec::new(),
            required_params: Vec::new(),
        },
        RouteConfig {
            endpoint: MINUTE_WRITER_PATH.to_string(),
            method: "POST".to_string(),
            input_type: InputType::File,
            description: "Generate meeting minutes from an audio recording".to_string(),
            accepted_files: AUDIO_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            required_params: Vec::new(),
        },
    ]
}
