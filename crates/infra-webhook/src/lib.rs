// Taskmill Infrastructure - Webhook Adapter
// Implements: WorkerSink

pub mod webhook_sink;

pub use webhook_sink::{DeliveryBody, WebhookWorkerSink};
