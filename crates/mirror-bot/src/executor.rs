//! Order execution adapters.
//!
//! The engine invokes a single capability: place one FOK mirror order and
//! observe success/failure plus a message. The default backend shells out
//! to the operator's Python order bridge, which owns credentials, signing
//! and relayer mechanics; alternative backends (native HTTP signer,
//! in-process) can slot in behind the same trait without touching the
//! pipeline.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use mirror_common::Side;
use rust_decimal::Decimal;
use tokio::process::Command;
use tracing::debug;

use crate::config::CopyConfig;

/// Backend name for the Python subprocess bridge.
pub const PYTHON_BRIDGE: &str = "python-bridge";

/// Result of one order placement.
#[derive(Debug, Clone)]
pub struct OrderAck {
    pub success: bool,
    pub message: String,
}

/// Order-placement capability.
///
/// Invoked serially per trade, concurrently across trades up to the
/// engine's parallelism ceiling.
#[async_trait]
pub trait Executor: Send + Sync {
    fn name(&self) -> &str;

    async fn place_order(
        &self,
        token_id: &str,
        side: Side,
        price: Decimal,
        shares: Decimal,
    ) -> OrderAck;
}

/// Build the configured live-execution backend.
///
/// Unknown backend names yield an adapter whose acks always fail with an
/// explanatory message, so a typo degrades to logged failures instead of
/// silent paper behavior.
pub fn build_executor(cfg: &CopyConfig) -> Arc<dyn Executor> {
    match cfg.live_exec.as_str() {
        PYTHON_BRIDGE => Arc::new(PythonBridgeExecutor::new(
            cfg.bridge_python.clone(),
            cfg.bridge_script.clone(),
        )),
        other => Arc::new(UnsupportedExecutor {
            name: other.to_string(),
        }),
    }
}

/// Adapter that delegates to the Python order bridge.
///
/// One subprocess per order: exit code 0 means placed, anything else is a
/// failure; stdout and stderr are concatenated into the ack message.
pub struct PythonBridgeExecutor {
    python: String,
    script: PathBuf,
}

impl PythonBridgeExecutor {
    pub fn new(python: String, script: PathBuf) -> Self {
        Self { python, script }
    }
}

/// Argument vector for the bridge script, always FOK.
fn bridge_args(token_id: &str, side: Side, price: Decimal, shares: Decimal) -> Vec<String> {
    vec![
        "--token-id".to_string(),
        token_id.to_string(),
        "--side".to_string(),
        side.to_string(),
        "--price".to_string(),
        price.to_string(),
        "--size".to_string(),
        shares.to_string(),
        "--order-type".to_string(),
        "FOK".to_string(),
    ]
}

#[async_trait]
impl Executor for PythonBridgeExecutor {
    fn name(&self) -> &str {
        PYTHON_BRIDGE
    }

    async fn place_order(
        &self,
        token_id: &str,
        side: Side,
        price: Decimal,
        shares: Decimal,
    ) -> OrderAck {
        let args = bridge_args(token_id, side, price, shares);
        debug!(script = %self.script.display(), ?args, "invoking order bridge");

        let output = Command::new(&self.python)
            .arg(&self.script)
            .args(&args)
            .kill_on_drop(false)
            .output()
            .await;

        match output {
            Ok(out) => {
                let mut message = String::from_utf8_lossy(&out.stdout).trim().to_string();
                let stderr = String::from_utf8_lossy(&out.stderr);
                let stderr = stderr.trim();
                if !stderr.is_empty() {
                    if !message.is_empty() {
                        message.push(' ');
                    }
                    message.push_str(stderr);
                }
                OrderAck {
                    success: out.status.success(),
                    message,
                }
            }
            Err(e) => OrderAck {
                success: false,
                message: format!("failed to spawn order bridge: {e}"),
            },
        }
    }
}

/// Placeholder for backend names the build does not know.
struct UnsupportedExecutor {
    name: String,
}

#[async_trait]
impl Executor for UnsupportedExecutor {
    fn name(&self) -> &str {
        &self.name
    }

    async fn place_order(
        &self,
        _token_id: &str,
        _side: Side,
        _price: Decimal,
        _shares: Decimal,
    ) -> OrderAck {
        OrderAck {
            success: false,
            message: format!(
                "unsupported live executor '{}'; only '{PYTHON_BRIDGE}' is available",
                self.name
            ),
        }
    }
}
