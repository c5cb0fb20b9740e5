//! Audit sinks for plugin lifecycle events

use async_trait::async_trait;
use std::sync::Arc;
use storefront_core::Result;
use storefront_core::domain::plugins::{AuditEntry, PluginStore};

/// Destination for audit entries.
///
/// Failures are reported to the caller, which decides whether they matter;
/// [`crate::PluginManager`] logs and continues.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, entry: &AuditEntry) -> Result<()>;
}

/// Persists entries to the `plugin_audit_log` table through a [`PluginStore`]
#[derive(Clone)]
pub struct StoreAuditSink {
    store: Arc<dyn PluginStore>,
}

impl StoreAuditSink {
    pub fn new(store: Arc<dyn PluginStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl AuditSink for StoreAuditSink {
    async fn record(&self, entry: &AuditEntry) -> Result<()> {
        self.store.record_audit(entry).await
    }
}

/// Emits entries as structured log events only
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, entry: &AuditEntry) -> Result<()> {
        tracing::info!(
            target: "storefront::audit",
            action = %entry.action,
            business_id = ?entry.business_id,
            user_id = ?entry.user_id,
            installation_id = ?entry.installation_id,
            plugin_key = ?entry.plugin_key,
            "Plugin audit event"
        );
        Ok(())
    }
}
