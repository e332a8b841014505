//! Per-task event fan-out for Prism.
//!
//! The [`BroadcastHub`] delivers log, progress, completion and error
//! messages for one task to every observer registered under that task.
//! Delivery is best-effort: each observer has a bounded queue and a full
//! queue drops messages instead of stalling the publisher.
//!
//! # Example
//!
//! ```
//! use prism_events::BroadcastHub;
//! use prism_models::TaskId;
//!
//! # tokio_test_block(async {
//! let hub = BroadcastHub::default();
//! let task = TaskId::from("apply-1");
//! let mut sub = hub.register(&task).unwrap();
//!
//! hub.send_log(&task, "Initializing the backend...");
//! let msg = sub.recv_message().await.unwrap();
//! assert_eq!(msg.data, "Initializing the backend...");
//! # });
//! # fn tokio_test_block<F: std::future::Future>(f: F) {
//! #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f);
//! # }
//! ```

pub mod config;
pub mod error;
pub mod hub;
pub mod message;

pub use config::{HubConfig, DEFAULT_CAPACITY};
pub use error::{HubError, Result};
pub use hub::{BroadcastHub, ObserverId, Subscription};
pub use message::{Message, MessageType};
