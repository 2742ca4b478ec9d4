//! Shared router state

use std::sync::Arc;

use paymount_billing::BillingService;

use crate::pages::{BuiltinPages, PageRenderer};

/// State shared by the pay routes and gated host routes
#[derive(Clone)]
pub struct AppState {
    pub billing: Arc<BillingService>,
    /// Display name shown on rendered pages
    pub app_name: String,
    pub pages: Arc<dyn PageRenderer>,
}

impl AppState {
    pub fn new(billing: BillingService, app_name: impl Into<String>) -> Self {
        Self {
            billing: Arc::new(billing),
            app_name: app_name.into(),
            pages: Arc::new(BuiltinPages),
        }
    }

    /// Replace the built-in success/cancel pages
    pub fn with_pages(mut self, pages: Arc<dyn PageRenderer>) -> Self {
        self.pages = pages;
        self
    }
}
