//! Delivery of one-time password reset codes.

use std::sync::Arc;

/// Hands a reset code to the account holder. E-mail transport is deployment glue; the service
/// only ships the console sender.
pub trait CodeSender: Send + Sync {
    fn send_reset_code(&self, identifier: &str, code: &str) -> Result<(), String>;
}

pub type CodeSenderState = Arc<dyn CodeSender>;

/// Logs the code instead of sending it (development).
#[derive(Clone, Copy, Default)]
pub struct ConsoleCodeSender;

impl ConsoleCodeSender {
    pub fn new() -> Self {
        Self
    }
}

impl CodeSender for ConsoleCodeSender {
    fn send_reset_code(&self, identifier: &str, code: &str) -> Result<(), String> {
        tracing::info!(identifier = %identifier, code = %code, "Password reset code issued");
        Ok(())
    }
}
