use crate::classifier::{Classification, Classifier};
use crate::headers::HeaderMap;
use crate::session::{Session, Stage};
use std::sync::Arc;

/// What the protocol engine should do after a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Continue,
    Accept,
    Reject,
    TempFail,
    Discard,
}

/// Message mutations the engine can perform on behalf of a handler.
pub trait HeaderModifier {
    fn add_header(&mut self, name: &str, value: &str);
}

/// Collects header additions so they can be applied once the handler has
/// returned.
#[derive(Debug, Default)]
pub struct PendingHeaders {
    headers: Vec<(String, String)>,
}

impl PendingHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    pub fn into_inner(self) -> Vec<(String, String)> {
        self.headers
    }
}

impl HeaderModifier for PendingHeaders {
    fn add_header(&mut self, name: &str, value: &str) {
        self.headers.push((name.to_string(), value.to_string()));
    }
}

/// Callbacks driven by the protocol engine, one method per SMTP stage.
///
/// Implementations must return promptly: no network or disk I/O.
pub trait StageHandler {
    fn connect(&mut self, hostname: &str) -> Disposition;
    fn helo(&mut self, name: &str) -> Disposition;
    fn mail_from(&mut self, sender: &str) -> Disposition;
    /// A rejection here only refuses this recipient.
    fn rcpt_to(&mut self, recipient: &str) -> Disposition;
    fn headers(&mut self, headers: &HeaderMap) -> Disposition;
    fn body(&mut self, body: &[u8], modifier: &mut dyn HeaderModifier) -> Disposition;

    /// The engine abandoned the current transaction.
    fn abort(&mut self) {}

    fn close(&mut self) {}
}

/// Hands out one [`ListIdFilter`] per connection, all sharing the same
/// read-only classifier.
#[derive(Debug, Clone)]
pub struct SessionFactory {
    classifier: Arc<Classifier>,
}

impl SessionFactory {
    pub fn new(classifier: Classifier) -> Self {
        SessionFactory {
            classifier: Arc::new(classifier),
        }
    }

    pub fn new_session(&self) -> ListIdFilter {
        ListIdFilter {
            classifier: Arc::clone(&self.classifier),
            session: Session::new(),
        }
    }
}

/// Adds `List-ID` and `List-Unsubscribe` to messages addressed to a known
/// mailing list.
#[derive(Debug)]
pub struct ListIdFilter {
    classifier: Arc<Classifier>,
    session: Session,
}

impl ListIdFilter {
    pub fn session(&self) -> &Session {
        &self.session
    }

    fn reset(&mut self) {
        self.session = Session::new();
    }
}

impl StageHandler for ListIdFilter {
    fn connect(&mut self, hostname: &str) -> Disposition {
        log::debug!("Connection from: {}", hostname);
        self.session.advance(Stage::Connected);
        Disposition::Continue
    }

    fn helo(&mut self, name: &str) -> Disposition {
        log::debug!("Helo: {}", name);
        self.session.advance(Stage::Greeted);
        Disposition::Continue
    }

    fn mail_from(&mut self, sender: &str) -> Disposition {
        log::debug!("Mail from: {}", sender);
        // MAIL FROM opens a transaction; nothing from an earlier one survives
        self.reset();
        self.session.advance(Stage::SenderKnown);
        Disposition::Continue
    }

    fn rcpt_to(&mut self, recipient: &str) -> Disposition {
        // Envelope recipients are not classified, only the To header is
        log::debug!("Rcpt to: {}", recipient);
        self.session.advance(Stage::RecipientKnown);
        Disposition::Continue
    }

    fn headers(&mut self, headers: &HeaderMap) -> Disposition {
        self.session.advance(Stage::HeadersReceived);

        if self.session.is_classified() {
            log::warn!("Headers already classified for this transaction, ignoring");
            return Disposition::Continue;
        }

        let to = headers.last("To").unwrap_or_default();
        log::info!("to: {}", to);

        let classification = self.classifier.classify(to);
        match &classification {
            Classification::Matched { list_id, .. } => {
                log::info!("Message for list {}, will add list headers", list_id)
            }
            Classification::NoMatch => log::info!("Not a list message, not adding headers"),
        }
        self.session.set_classification(classification);

        Disposition::Continue
    }

    fn body(&mut self, body: &[u8], modifier: &mut dyn HeaderModifier) -> Disposition {
        self.session.advance(Stage::BodyReceived);
        log::debug!("Body received: {} bytes", body.len());

        let classification = self.session.take_classification();
        if classification.is_match() && !self.session.is_decorated() {
            for (name, value) in classification.list_headers() {
                log::info!("Adding header {}: {}", name, value);
                modifier.add_header(&name, &value);
            }
            self.session.mark_decorated();
        }

        Disposition::Accept
    }

    fn abort(&mut self) {
        log::debug!("Transaction aborted");
        self.reset();
    }

    fn close(&mut self) {
        self.session.advance(Stage::Closed);
    }
}
