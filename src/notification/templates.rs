//! Message bodies for the reviewer chat (Telegram HTML parse mode).

use crate::models::{AccessRequest, DecisionAction, RequestStatus};

use super::InteractiveAction;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S UTC";

/// Escape the three characters Telegram's HTML mode treats as markup.
pub fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

pub fn request_body(r: &AccessRequest) -> String {
    format!(
        "🔐 <b>Privilege Access Request</b>\n\n\
         👤 <b>Requestor:</b> {}\n\
         🔑 <b>Login Fullname:</b> {}\n\
         🖥️ <b>System:</b> {}\n\
         📂 <b>Type:</b> {}\n\
         📝 <b>Reason:</b> {}\n\
         ⏰ <b>Requested At:</b> {}\n\
         ⌛ <b>Expires At:</b> {}",
        escape_html(&r.requestor_name),
        r.login_name.as_deref().map(escape_html).unwrap_or_else(|| "N/A".to_string()),
        escape_html(&r.system_name),
        escape_html(&r.access_type),
        escape_html(&r.reason),
        r.requested_at.format(TIMESTAMP_FORMAT),
        r.expires_at.format(TIMESTAMP_FORMAT),
    )
}

pub fn decision_actions(request_id: &str) -> Vec<InteractiveAction> {
    vec![
        InteractiveAction {
            label: "✅ Approve".to_string(),
            callback_data: DecisionAction::Approve.callback_data(request_id),
        },
        InteractiveAction {
            label: "❌ Decline".to_string(),
            callback_data: DecisionAction::Decline.callback_data(request_id),
        },
    ]
}

/// Original request plus the outcome line. Used for every terminal status.
pub fn settled_body(r: &AccessRequest) -> String {
    if r.status == RequestStatus::Expired {
        return format!(
            "{}\n\n⌛ <b>Status:</b> EXPIRED\nThis request is no longer valid.",
            request_body(r)
        );
    }

    let emoji = match r.status {
        RequestStatus::Approved => "✅",
        _ => "❌",
    };
    let responder = r.responder_name.as_deref().unwrap_or("Unknown");
    let handle = r
        .responder_handle
        .as_deref()
        .filter(|h| *h != responder)
        .map(|h| format!(" ({})", escape_html(h)))
        .unwrap_or_default();
    let at = r
        .responded_at
        .map(|t| t.format(TIMESTAMP_FORMAT).to_string())
        .unwrap_or_default();

    format!(
        "{}\n\n{} <b>Status:</b> {} by {}{}\n🕒 <b>Responded At:</b> {}",
        request_body(r),
        emoji,
        r.status.as_str().to_uppercase(),
        escape_html(responder),
        handle,
        at,
    )
}
