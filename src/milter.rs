use crate::classifier::Classifier;
use crate::config::Config;
use crate::handler::{Disposition, ListIdFilter, PendingHeaders, SessionFactory, StageHandler};
use crate::headers::HeaderMap;
use crate::listener::BoundListener;
use indymilter::{
    run, Actions, Callbacks, Config as IndyConfig, Context, ContextActions, EomContext, Status,
};
use std::ffi::CString;

pub struct Milter {
    factory: SessionFactory,
}

/// Everything the milter keeps for one MTA connection.
struct Connection {
    filter: ListIdFilter,
    headers: HeaderMap,
    body: Vec<u8>,
}

impl Connection {
    fn new(filter: ListIdFilter) -> Self {
        Connection {
            filter,
            headers: HeaderMap::new(),
            body: Vec::new(),
        }
    }

    fn clear_message(&mut self) {
        self.headers.clear();
        self.body.clear();
    }

    fn begin_transaction(&mut self, sender: &str) -> Disposition {
        self.clear_message();
        self.filter.mail_from(sender)
    }

    fn end_of_headers(&mut self) -> Disposition {
        self.filter.headers(&self.headers)
    }

    fn finish_message(&mut self) -> (Disposition, Vec<(String, String)>) {
        let mut pending = PendingHeaders::new();
        let disposition = self.filter.body(&self.body, &mut pending);
        self.clear_message();
        (disposition, pending.into_inner())
    }

    fn abort(&mut self) {
        self.clear_message();
        self.filter.abort();
    }
}

impl From<Disposition> for Status {
    fn from(disposition: Disposition) -> Self {
        match disposition {
            Disposition::Continue => Status::Continue,
            Disposition::Accept => Status::Accept,
            Disposition::Reject => Status::Reject,
            Disposition::TempFail => Status::Tempfail,
            Disposition::Discard => Status::Discard,
        }
    }
}

/// Address from MAIL/RCPT arguments, without the surrounding brackets.
fn envelope_address(args: &[CString]) -> String {
    args.first()
        .map(|arg| arg.to_string_lossy().trim_matches(['<', '>']).to_string())
        .unwrap_or_default()
}

fn dispatch(
    data: &mut Option<Connection>,
    stage: impl FnOnce(&mut Connection) -> Disposition,
) -> Status {
    match data.as_mut() {
        Some(connection) => stage(connection).into(),
        None => {
            log::warn!("Milter callback without connection state");
            Status::Continue
        }
    }
}

async fn end_of_message(ctx: &mut EomContext<Connection>) -> Status {
    let (disposition, pending) = match ctx.data.as_mut() {
        Some(connection) => connection.finish_message(),
        None => {
            log::warn!("End of message without connection state");
            return Status::Accept;
        }
    };

    for (name, value) in pending {
        if let Err(e) = ctx.actions.add_header(name, value).await {
            log::error!("Failed to add header: {}", e);
        }
    }

    disposition.into()
}

impl Milter {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        config.lists.validate()?;
        let classifier = Classifier::new(&config.lists);
        log::info!("Loaded {} list rules", classifier.rule_count());
        Ok(Milter {
            factory: SessionFactory::new(classifier),
        })
    }

    pub fn factory(&self) -> &SessionFactory {
        &self.factory
    }

    pub async fn run(&self, listener: BoundListener) -> anyhow::Result<()> {
        log::info!("Starting milter on: {}", listener);

        // Only header insertion is ever requested from the MTA
        let config = IndyConfig {
            actions: Actions::ADD_HEADER,
            ..Default::default()
        };

        match listener {
            BoundListener::Unix {
                listener,
                socket_file: _socket_file,
            } => run(listener, self.callbacks(), config, tokio::signal::ctrl_c()).await?,
            BoundListener::Tcp(listener) => {
                run(listener, self.callbacks(), config, tokio::signal::ctrl_c()).await?
            }
        }

        log::info!("Milter stopped");
        Ok(())
    }

    fn callbacks(&self) -> Callbacks<Connection> {
        Callbacks {
            connect: Some(Box::new({
                let factory = self.factory.clone();
                move |ctx: &mut Context<Connection>, hostname, _socket_info| {
                    let hostname = hostname.to_string_lossy().to_string();
                    let mut connection = Connection::new(factory.new_session());
                    let status: Status = connection.filter.connect(&hostname).into();
                    ctx.data = Some(connection);
                    Box::pin(async move { status })
                }
            })),

            helo: Some(Box::new(|ctx: &mut Context<Connection>, name| {
                let name = name.to_string_lossy().to_string();
                let status = dispatch(&mut ctx.data, |c| c.filter.helo(&name));
                Box::pin(async move { status })
            })),

            mail: Some(Box::new(|ctx: &mut Context<Connection>, args| {
                let sender = envelope_address(&args);
                let status = dispatch(&mut ctx.data, |c| c.begin_transaction(&sender));
                Box::pin(async move { status })
            })),

            rcpt: Some(Box::new(|ctx: &mut Context<Connection>, args| {
                let recipient = envelope_address(&args);
                let status = dispatch(&mut ctx.data, |c| c.filter.rcpt_to(&recipient));
                Box::pin(async move { status })
            })),

            header: Some(Box::new(|ctx: &mut Context<Connection>, name, value| {
                let status = dispatch(&mut ctx.data, |c| {
                    c.headers
                        .append(name.to_string_lossy(), value.to_string_lossy());
                    Disposition::Continue
                });
                Box::pin(async move { status })
            })),

            eoh: Some(Box::new(|ctx: &mut Context<Connection>| {
                let status = dispatch(&mut ctx.data, Connection::end_of_headers);
                Box::pin(async move { status })
            })),

            body: Some(Box::new(|ctx: &mut Context<Connection>, chunk| {
                let status = dispatch(&mut ctx.data, |c| {
                    c.body.extend_from_slice(&chunk);
                    Disposition::Continue
                });
                Box::pin(async move { status })
            })),

            eom: Some(Box::new(|ctx: &mut EomContext<Connection>| {
                Box::pin(end_of_message(ctx))
            })),

            abort: Some(Box::new(|ctx: &mut Context<Connection>| {
                if let Some(connection) = ctx.data.as_mut() {
                    connection.abort();
                }
                Box::pin(async { Status::Continue })
            })),

            close: Some(Box::new(|ctx: &mut Context<Connection>| {
                if let Some(mut connection) = ctx.data.take() {
                    connection.filter.close();
                }
                Box::pin(async { Status::Continue })
            })),

            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connection() -> Connection {
        let milter = Milter::new(&Config::default()).unwrap();
        Connection::new(milter.factory().new_session())
    }

    fn feed_headers(connection: &mut Connection, to: &str) {
        connection.headers.append("From", "sender@example.net");
        connection.headers.append("To", to);
        assert_eq!(connection.end_of_headers(), Disposition::Continue);
        connection.body.extend_from_slice(b"hello\r\n");
    }

    #[test]
    fn test_envelope_address() {
        let args = vec![
            CString::new("<someone@example.com>").unwrap(),
            CString::new("SIZE=1024").unwrap(),
        ];
        assert_eq!(envelope_address(&args), "someone@example.com");
        assert_eq!(envelope_address(&[CString::new("<>").unwrap()]), "");
        assert_eq!(envelope_address(&[]), "");
    }

    #[test]
    fn test_disposition_to_status() {
        assert!(matches!(Status::from(Disposition::Continue), Status::Continue));
        assert!(matches!(Status::from(Disposition::Accept), Status::Accept));
        assert!(matches!(Status::from(Disposition::Reject), Status::Reject));
        assert!(matches!(Status::from(Disposition::TempFail), Status::Tempfail));
        assert!(matches!(Status::from(Disposition::Discard), Status::Discard));
    }

    #[test]
    fn test_message_for_list_requests_headers() {
        let mut connection = connection();
        connection.begin_transaction("sender@example.net");
        feed_headers(&mut connection, "utilities@giraffic.world");

        let (disposition, pending) = connection.finish_message();
        assert_eq!(disposition, Disposition::Accept);
        assert_eq!(
            pending,
            vec![
                (
                    "List-Unsubscribe".to_string(),
                    "<https://giraffic.world/lists>".to_string()
                ),
                ("List-ID".to_string(), "<utilities@giraffic.world>".to_string()),
            ]
        );
        assert!(connection.headers.is_empty());
        assert!(connection.body.is_empty());
    }

    #[test]
    fn test_buffers_reset_between_transactions() {
        let mut connection = connection();
        connection.begin_transaction("sender@example.net");
        connection.headers.append("To", "utilities@giraffic.world");
        connection.abort();
        assert!(connection.headers.is_empty());

        connection.begin_transaction("sender@example.net");
        feed_headers(&mut connection, "random@example.com");
        let (_, pending) = connection.finish_message();
        assert!(pending.is_empty());
    }

    #[test]
    fn test_rejects_invalid_rules() {
        let mut config = Config::default();
        config.lists.canonical_list_domain = String::new();
        assert!(Milter::new(&config).is_err());
    }
}
