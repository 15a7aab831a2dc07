//! Config - Whiteboard 설정 관리
//!
//! - `whiteboard.rs` - WhiteboardConfig 통합 설정 (JSON / TOML)

mod whiteboard;

pub use whiteboard::{DefaultApplicationConfig, WhiteboardConfig, WHITEBOARD_CONFIG_FILE};
