pub mod camera_monitor;
pub mod config;
pub mod controller;
pub mod error;
pub mod error_recovery;
pub mod health_monitor;
pub mod http_client;
pub mod identity;
pub mod keepalive;
pub mod models;
pub mod path_manager;
pub mod readiness;
pub mod recording_manager;
pub mod rtsp_connection_manager;
pub mod snapshot_manager;
pub mod stream_manager;
pub mod transcoder;
