use std::collections::HashMap;

use chrono::SecondsFormat;
use tracing::{debug, warn};

use crate::models::{event::NotificationEvent, template::RenderedEmail};

pub const WELCOME_SUBJECT: &str = "Welcome! Your account has been created successfully";

const WELCOME_HTML: &str = r#"<!DOCTYPE html>
<html>
<head>
  <meta charset="utf-8">
  <title>Welcome to Our Platform</title>
  <style>
    body { font-family: Arial, sans-serif; line-height: 1.6; color: #333; }
    .container { max-width: 600px; margin: 0 auto; padding: 20px; }
    .header { background-color: #007bff; color: white; padding: 20px; text-align: center; }
    .content { padding: 20px; background-color: #f9f9f9; }
    .footer { padding: 20px; text-align: center; color: #666; font-size: 12px; }
  </style>
</head>
<body>
  <div class="container">
    <div class="header">
      <h1>Welcome to Our Platform!</h1>
    </div>
    <div class="content">
      <h2>Hello {{full_name}}!</h2>
      <p>Thank you for joining our platform. Your account has been created successfully.</p>
      <p><strong>Your message:</strong> {{message}}</p>
      <p>We're excited to have you on board and look forward to providing you with an excellent experience.</p>
      <p>If you have any questions or need assistance, please don't hesitate to contact our support team.</p>
    </div>
    <div class="footer">
      <p>This email was sent on {{sent_on}}</p>
    </div>
  </div>
</body>
</html>
"#;

const WELCOME_TEXT: &str = "Hello {{full_name}}!

Thank you for joining our platform. Your account has been created successfully.

Your message: {{message}}

If you have any questions or need assistance, please contact our support team.

This email was sent on {{sent_on}}
";

/// Renders the welcome email for `event`. Pure: no I/O, no failure modes.
pub fn render_welcome_email(event: &NotificationEvent) -> RenderedEmail {
    let variables = HashMap::from([
        ("full_name", event.full_name.as_str()),
        ("message", event.message.as_str()),
    ]);
    let sent_on = event.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true);

    debug!(user_id = %event.user_id, "Rendering welcome email");

    let mut html_vars: HashMap<&str, String> = variables
        .iter()
        .map(|(k, v)| (*k, escape_html(v)))
        .collect();
    html_vars.insert("sent_on", sent_on.clone());

    let mut text_vars: HashMap<&str, String> = variables
        .iter()
        .map(|(k, v)| (*k, v.to_string()))
        .collect();
    text_vars.insert("sent_on", sent_on);

    RenderedEmail {
        to: event.email.clone(),
        subject: WELCOME_SUBJECT.to_string(),
        body_html: replace_variables(WELCOME_HTML, &html_vars),
        body_text: replace_variables(WELCOME_TEXT, &text_vars),
    }
}

/// Substitutes `{{name}}` placeholders. Unknown placeholders render as an
/// empty string.
fn replace_variables(template: &str, variables: &HashMap<&str, String>) -> String {
    let mut result = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        result.push_str(&rest[..start]);

        let Some(len) = rest[start + 2..].find("}}") else {
            result.push_str(&rest[start..]);
            return result;
        };

        let name = rest[start + 2..start + 2 + len].trim();

        match variables.get(name) {
            Some(value) => result.push_str(value),
            None => warn!(missing_variable = name, "Template contains unknown variable"),
        }

        rest = &rest[start + 2 + len + 2..];
    }

    result.push_str(rest);
    result
}

fn escape_html(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());

    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }

    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn event(full_name: &str, message: &str) -> NotificationEvent {
        NotificationEvent {
            user_id: "u1".to_string(),
            email: "a@b.com".to_string(),
            full_name: full_name.to_string(),
            message: message.to_string(),
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn welcome_email_carries_name_and_message() {
        let rendered = render_welcome_email(&event("A B", "hi"));

        assert_eq!(rendered.to, "a@b.com");
        assert!(rendered.subject.contains("Welcome"));
        assert!(rendered.body_html.contains("Hello A B!"));
        assert!(rendered.body_html.contains("hi"));
        assert!(rendered.body_text.contains("Your message: hi"));
        assert!(rendered.body_text.contains("2024-01-01T00:00:00Z"));
        assert!(!rendered.body_html.contains("{{"));
    }

    #[test]
    fn html_body_escapes_user_input() {
        let rendered = render_welcome_email(&event("<b>Eve</b>", "a & b"));

        assert!(rendered.body_html.contains("&lt;b&gt;Eve&lt;/b&gt;"));
        assert!(rendered.body_html.contains("a &amp; b"));
        assert!(rendered.body_text.contains("<b>Eve</b>"));
    }

    #[test]
    fn unknown_placeholders_render_empty() {
        let vars = HashMap::from([("known", "x".to_string())]);

        assert_eq!(replace_variables("[{{known}}][{{unknown}}]", &vars), "[x][]");
        assert_eq!(replace_variables("open {{known", &vars), "open {{known");
    }
}
