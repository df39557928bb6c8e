//! Handlebars rendering of campaign templates.

use cadence_queue::{Recipient, Template};
use handlebars::{Handlebars, no_escape};
use serde::Serialize;

use crate::Result;

/// Placeholder values available to every template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InviteContext {
    pub business_name: String,
    pub business_id: String,
    pub email: String,
    pub invite_link: String,
}

impl InviteContext {
    pub fn new(recipient: &Recipient, link_base: &str) -> Self {
        Self {
            business_name: recipient.name.clone().unwrap_or_default(),
            business_id: recipient.recipient_id.clone(),
            email: recipient.email.clone(),
            invite_link: invite_link(link_base, &recipient.invite_token),
        }
    }
}

/// `<base>?eid=biz_<token>`, appending to an existing query string if present.
///
/// ```
/// use cadence_mail::invite_link;
///
/// assert_eq!(invite_link("https://x.io/rsvp", "abc"), "https://x.io/rsvp?eid=biz_abc");
/// assert_eq!(invite_link("https://x.io/rsvp?src=mail", "abc"), "https://x.io/rsvp?src=mail&eid=biz_abc");
/// ```
pub fn invite_link(link_base: &str, token: &str) -> String {
    let separator = if link_base.contains('?') { '&' } else { '?' };
    format!("{link_base}{separator}eid=biz_{token}")
}

/// Subject and bodies rendered for one recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMessage {
    pub subject: String,
    pub html: String,
    pub text: Option<String>,
}

/// Renders templates with HTML escaping for the HTML body only.
pub struct TemplateRenderer {
    html: Handlebars<'static>,
    plain: Handlebars<'static>,
    link_base: String,
}

impl TemplateRenderer {
    pub fn new(link_base: impl Into<String>) -> Self {
        let mut html = Handlebars::new();
        html.set_strict_mode(true);

        let mut plain = Handlebars::new();
        plain.set_strict_mode(true);
        plain.register_escape_fn(no_escape);

        Self {
            html,
            plain,
            link_base: link_base.into(),
        }
    }

    pub fn link_base(&self) -> &str {
        &self.link_base
    }

    pub fn render(&self, template: &Template, recipient: &Recipient) -> Result<RenderedMessage> {
        let context = InviteContext::new(recipient, &self.link_base);

        let subject = self.plain.render_template(&template.subject, &context)?;
        let html = self.html.render_template(&template.html, &context)?;
        let text = template
            .text
            .as_deref()
            .map(|text| self.plain.render_template(text, &context))
            .transpose()?;

        Ok(RenderedMessage {
            subject: subject.trim().to_string(),
            html,
            text,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MailError;
    use cadence_queue::Contact;

    fn recipient() -> Recipient {
        Contact::new("biz-7")
            .with_name("Tom & Jerry's")
            .with_email("owner@tj.io")
            .with_token("t0k")
            .into_recipient()
            .unwrap()
    }

    #[test]
    fn test_placeholders_filled() {
        let template = Template::new(
            "Invite",
            "Welcome {{business_name}}",
            r#"<a href="{{invite_link}}">RSVP</a> for {{business_name}} ({{business_id}})"#,
        )
        .with_text("Hi {{business_name}}, RSVP at {{invite_link}} ({{email}})");

        let renderer = TemplateRenderer::new("https://events.example.com/rsvp");
        let message = renderer.render(&template, &recipient()).unwrap();

        assert_eq!(message.subject, "Welcome Tom & Jerry's");
        assert!(message.html.contains("https://events.example.com/rsvp?eid=biz_t0k"));
        assert!(message.html.contains("Tom &amp; Jerry"));
        assert!(message.html.contains("(biz-7)"));
        assert_eq!(
            message.text.as_deref(),
            Some("Hi Tom & Jerry's, RSVP at https://events.example.com/rsvp?eid=biz_t0k (owner@tj.io)")
        );
    }

    #[test]
    fn test_unknown_placeholder_fails() {
        let template = Template::new("Invite", "Hi", "{{unknown_field}}");
        let renderer = TemplateRenderer::new("https://x.io");
        assert!(matches!(
            renderer.render(&template, &recipient()),
            Err(MailError::Template(_))
        ));
    }
}
