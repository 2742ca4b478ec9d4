//! HTML pages served after checkout

/// Renders the pages the processor redirects back to.
///
/// Hosts with their own templating implement this and pass it through
/// [`crate::state::AppState::with_pages`].
pub trait PageRenderer: Send + Sync {
    fn success(&self, app_name: &str, session_id: Option<&str>) -> String;

    fn cancel(&self, app_name: &str) -> String;

    /// Stand-in for the processor portal in dev mode
    fn portal_dev(&self, app_name: &str, customer_id: &str) -> String;
}

/// Minimal self-contained pages
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinPages;

fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}

fn page(app_name: &str, title: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<title>{title} - {app}</title>\n</head>\n<body>\n<h1>{title}</h1>\n{body}\n<p><a href=\"/\">Back to {app}</a></p>\n</body>\n</html>\n",
        title = title,
        app = escape(app_name),
        body = body,
    )
}

impl PageRenderer for BuiltinPages {
    fn success(&self, app_name: &str, session_id: Option<&str>) -> String {
        let detail = match session_id {
            Some(id) => format!("<p>Reference: <code>{}</code></p>", escape(id)),
            None => String::new(),
        };
        page(
            app_name,
            "Payment Successful",
            &format!("<p>Thank you! Your payment was received.</p>{detail}"),
        )
    }

    fn cancel(&self, app_name: &str) -> String {
        page(
            app_name,
            "Payment Cancelled",
            "<p>Your payment was cancelled. You have not been charged.</p>",
        )
    }

    fn portal_dev(&self, app_name: &str, customer_id: &str) -> String {
        page(
            app_name,
            "Billing Portal (dev mode)",
            &format!(
                "<p>No payment processor is configured. Customer: <code>{}</code></p>",
                escape(customer_id)
            ),
        )
    }
}
