//! Mail delivery for Cadence.
//!
//! - 📧 SMTP transport via lettre, plus a recording transport for tests
//! - 📝 Handlebars rendering of invite templates
//! - 🚚 Throttled dispatcher with claim-before-send and bounded retries
//!
//! ## Quick Start
//!
//! ```no_run
//! use cadence_mail::*;
//! use cadence_queue::InMemoryStore;
//! use cadence_slots::SystemClock;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<()> {
//! let smtp = SmtpTransport::new(
//!     SmtpConfig::new("smtp.example.com", "invites@example.com")
//!         .credentials("user", "secret")
//!         .from_name("Events Team"),
//! )?;
//!
//! let dispatcher = Dispatcher::new(
//!     Arc::new(InMemoryStore::new()),
//!     Arc::new(smtp),
//!     Arc::new(TemplateRenderer::new("https://events.example.com/rsvp")),
//!     Arc::new(SystemClock),
//! )
//! .with_config(DispatchConfig::new().with_batch_limit(100));
//!
//! let report = dispatcher.poll(None).await?;
//! println!("sent {} emails", report.sent);
//! # Ok(())
//! # }
//! ```

pub mod dispatcher;
pub mod error;
pub mod recording;
pub mod render;
pub mod transport;

pub use dispatcher::{DispatchConfig, DispatchReport, Dispatcher};
pub use error::{MailError, Result};
pub use recording::RecordingTransport;
pub use render::{InviteContext, RenderedMessage, TemplateRenderer, invite_link};
pub use transport::{OutboundEmail, SendReceipt, SmtpConfig, SmtpSecurity, SmtpTransport, Transport};

/// Prelude for common imports.
pub mod prelude {
    pub use crate::dispatcher::{DispatchConfig, DispatchReport, Dispatcher};
    pub use crate::error::{MailError, Result};
    pub use crate::render::TemplateRenderer;
    pub use crate::transport::{OutboundEmail, SmtpConfig, SmtpTransport, Transport};
}
