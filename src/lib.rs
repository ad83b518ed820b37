//! Sof-IA - voice assistant for a mobile wallet
//!
//! This library provides:
//! - The voice interaction controller (wake phrase, recording, processing, spoken reply)
//! - Native desktop providers for microphone capture, recognition and playback
//! - Backend services (transcription, intent recognition, fallback replies, synthesis)
//! - The HTTP API the controller talks to
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                   Voice controller                   │
//! │  Listening → Recording → Processing → Speaking → ... │
//! └────────────────────┬────────────────────────────────┘
//!                      │ multipart audio / text
//! ┌────────────────────▼────────────────────────────────┐
//! │                     HTTP API                         │
//! │   /api/voice/process  │  /api/chat  │  /health       │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                     Services                         │
//! │   STT  │  Intents  │  Fallback  │  TTS              │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod api;
pub mod config;
pub mod error;
pub mod services;
pub mod topics;
pub mod voice;

pub use config::Config;
pub use error::{CaptureError, Error, RecognitionErrorKind, Result};
pub use services::{Assistant, ProcessReply};
pub use topics::{TopicCatalog, TopicRecord};
pub use voice::{
    ControllerConfig, ControllerHandle, IntentRouter, Phase, Providers, VoiceController,
    VoiceSessionState,
};
