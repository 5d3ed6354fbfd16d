use std::{collections::VecDeque, net::TcpStream};

use chrono::NaiveDate;
use chrono_tz::Tz;
use mailparse::{DispositionType, ParsedMail};
use native_tls::{TlsConnector, TlsStream};
use once_cell::sync::Lazy;
use scraper::{Html, Selector};
use thiserror::Error;
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::{self, ImapSettings};
use crate::extraction::{ExtractionRequest, GigPipeline, MessageSource};
use crate::models::ArtistId;
use crate::utils;

static BODY_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("body").expect("valid body selector"));

#[derive(Debug, Error)]
pub enum MailError {
    #[error("tls error: {0}")]
    Tls(String),
    #[error("imap error: {0}")]
    Imap(String),
    #[error("mail worker failed: {0}")]
    Worker(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMail {
    pub uid: u32,
    pub body: String,
}

/// Pull-based view of unseen gig mail.
///
/// `next_message` walks a finite batch fixed when the source was opened;
/// nothing is marked seen until `acknowledge` is called for its uid.
pub trait MailSource: Send {
    fn next_message(&mut self) -> Result<Option<InboundMail>, MailError>;
    fn acknowledge(&mut self, uid: u32) -> Result<(), MailError>;
    fn finish(&mut self) -> Result<(), MailError> {
        Ok(())
    }
}

type ImapSession = imap::Session<TlsStream<TcpStream>>;

pub struct ImapMailbox {
    session: ImapSession,
    pending: VecDeque<u32>,
}

impl ImapMailbox {
    /// Logs in, selects the folder and queues unseen uids whose subject
    /// matches. Blocking.
    pub fn connect(settings: &ImapSettings) -> Result<Self, MailError> {
        let tls = TlsConnector::builder()
            .build()
            .map_err(|err| MailError::Tls(err.to_string()))?;
        let client = imap::connect(
            (settings.host.as_str(), settings.port),
            settings.host.as_str(),
            &tls,
        )
        .map_err(imap_error)?;
        let mut session = client
            .login(&settings.user, &settings.password)
            .map_err(|(err, _)| imap_error(err))?;

        session.select(&settings.folder).map_err(imap_error)?;
        let query = format!("UNSEEN SUBJECT {}", quote(&settings.subject));
        let mut uids: Vec<u32> = session
            .uid_search(query)
            .map_err(imap_error)?
            .into_iter()
            .collect();
        uids.sort_unstable();
        debug!(folder = %settings.folder, count = uids.len(), "unseen gig mail");

        Ok(Self {
            session,
            pending: uids.into(),
        })
    }
}

impl MailSource for ImapMailbox {
    fn next_message(&mut self) -> Result<Option<InboundMail>, MailError> {
        while let Some(uid) = self.pending.pop_front() {
            // PEEK keeps the message unseen until it is acknowledged.
            let fetches = self
                .session
                .uid_fetch(uid.to_string(), "BODY.PEEK[]")
                .map_err(imap_error)?;
            let raw = fetches.iter().find_map(|fetch| fetch.body().map(<[u8]>::to_vec));
            let Some(raw) = raw else {
                warn!(uid, "message disappeared before fetch");
                continue;
            };
            let body = extract_body(&raw).unwrap_or_else(|err| {
                warn!(uid, "unreadable message body: {err}");
                String::new()
            });
            return Ok(Some(InboundMail { uid, body }));
        }
        Ok(None)
    }

    fn acknowledge(&mut self, uid: u32) -> Result<(), MailError> {
        self.session
            .uid_store(uid.to_string(), "+FLAGS (\\Seen)")
            .map_err(imap_error)?;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), MailError> {
        self.session.logout().map_err(imap_error)
    }
}

fn imap_error(err: imap::Error) -> MailError {
    MailError::Imap(err.to_string())
}

fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Plain text part if there is one, otherwise the HTML part as text.
pub fn extract_body(raw: &[u8]) -> Result<String, mailparse::MailParseError> {
    let parsed = mailparse::parse_mail(raw)?;
    if let Some(text) = find_part(&parsed, "text/plain")? {
        return Ok(text.trim().to_string());
    }
    if let Some(html) = find_part(&parsed, "text/html")? {
        return Ok(html_to_text(&html));
    }
    Ok(String::new())
}

fn find_part(
    part: &ParsedMail<'_>,
    mimetype: &str,
) -> Result<Option<String>, mailparse::MailParseError> {
    if part.get_content_disposition().disposition == DispositionType::Attachment {
        return Ok(None);
    }
    if part.subparts.is_empty() {
        if part.ctype.mimetype.eq_ignore_ascii_case(mimetype) {
            return part.get_body().map(Some);
        }
        return Ok(None);
    }
    for sub in &part.subparts {
        if let Some(found) = find_part(sub, mimetype)? {
            return Ok(Some(found));
        }
    }
    Ok(None)
}

fn html_to_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let text = match document.select(&BODY_SELECTOR).next() {
        Some(body) => body.text().collect::<Vec<_>>().join(" "),
        None => document.root_element().text().collect::<Vec<_>>().join(" "),
    };
    utils::clean_text(&text)
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PollSummary {
    pub committed: usize,
    pub rejected: usize,
    /// Left unseen after a retryable AI failure.
    pub deferred: usize,
    pub skipped: usize,
    /// Processed but could not be marked seen; the next cycle sees them again.
    pub unacknowledged: usize,
}

/// Runs one blocking mail operation off the async runtime, handing the source
/// back with the result.
async fn on_worker<M, T, F>(mut source: M, op: F) -> Result<(M, Result<T, MailError>), MailError>
where
    M: MailSource + 'static,
    T: Send + 'static,
    F: FnOnce(&mut M) -> Result<T, MailError> + Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let out = op(&mut source);
        (source, out)
    })
    .await
    .map_err(|err| MailError::Worker(err.to_string()))
}

/// Feeds every queued message through the pipeline for `artist`.
///
/// Messages are marked seen after a terminal outcome. Retryable AI failures
/// stay unseen so the next cycle submits them again. A failed acknowledge is
/// counted and the batch continues; a failed fetch ends the batch, closes the
/// source and is returned.
pub async fn run_cycle<M>(
    source: M,
    pipeline: &GigPipeline,
    artist: &ArtistId,
    today: NaiveDate,
) -> Result<PollSummary, MailError>
where
    M: MailSource + 'static,
{
    let mut summary = PollSummary::default();
    let mut source = source;
    let mut failure = None;

    loop {
        let (returned, next) = on_worker(source, |s| s.next_message()).await?;
        source = returned;
        let mail = match next {
            Ok(Some(mail)) => mail,
            Ok(None) => break,
            Err(err) => {
                failure = Some(err);
                break;
            }
        };
        let uid = mail.uid;

        if mail.body.trim().is_empty() {
            debug!(uid, "skipping empty message");
            summary.skipped += 1;
        } else {
            let request =
                ExtractionRequest::new(mail.body, artist.clone(), today, MessageSource::Mail { uid });
            match pipeline.process(&request).await {
                Ok(_) => summary.committed += 1,
                Err(err) if err.is_retryable() => {
                    summary.deferred += 1;
                    continue;
                }
                Err(_) => summary.rejected += 1,
            }
        }

        let (returned, acked) = on_worker(source, move |s| s.acknowledge(uid)).await?;
        source = returned;
        if let Err(err) = acked {
            warn!(uid, "failed to mark message seen: {err}");
            summary.unacknowledged += 1;
        }
    }

    let (_, finished) = on_worker(source, |s| s.finish()).await?;
    if let Err(err) = finished {
        warn!("mail session did not close cleanly: {err}");
    }
    match failure {
        Some(err) => Err(err),
        None => Ok(summary),
    }
}

/// Polls the mailbox now and then every `settings.interval`.
pub fn spawn_poller(settings: ImapSettings, pipeline: GigPipeline, tz: Tz) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            host = %settings.host,
            folder = %settings.folder,
            artist = %settings.artist,
            interval_secs = settings.interval.as_secs(),
            "mail poller started"
        );

        loop {
            ticker.tick().await;
            let connect_settings = settings.clone();
            let mailbox = match tokio::task::spawn_blocking(move || {
                ImapMailbox::connect(&connect_settings)
            })
            .await
            {
                Ok(Ok(mailbox)) => mailbox,
                Ok(Err(err)) => {
                    error!("mail check failed: {err}");
                    continue;
                }
                Err(err) => {
                    error!("mail check worker failed: {err}");
                    continue;
                }
            };

            match run_cycle(mailbox, &pipeline, &settings.artist, config::today_in(tz)).await {
                Ok(summary) => info!(
                    committed = summary.committed,
                    rejected = summary.rejected,
                    deferred = summary.deferred,
                    skipped = summary.skipped,
                    unacknowledged = summary.unacknowledged,
                    "mail check finished"
                ),
                Err(err) => error!("mail check failed: {err}"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::llm::CompletionError;
    use crate::test_support::{MemoryGigStore, StubCompletion};

    const PURPLES: &str = r#"{"venue":"Purples","city":"Rosemont","time":"9:00 PM"}"#;

    struct VecMailSource {
        queue: VecDeque<InboundMail>,
        acked: Arc<Mutex<Vec<u32>>>,
        finished: Arc<Mutex<bool>>,
        rejected_acks: Vec<u32>,
        broken_after_queue: bool,
    }

    impl VecMailSource {
        fn new(bodies: &[(u32, &str)]) -> (Self, Arc<Mutex<Vec<u32>>>, Arc<Mutex<bool>>) {
            let acked = Arc::new(Mutex::new(Vec::new()));
            let finished = Arc::new(Mutex::new(false));
            let source = Self {
                queue: bodies
                    .iter()
                    .map(|(uid, body)| InboundMail {
                        uid: *uid,
                        body: body.to_string(),
                    })
                    .collect(),
                acked: acked.clone(),
                finished: finished.clone(),
                rejected_acks: Vec::new(),
                broken_after_queue: false,
            };
            (source, acked, finished)
        }
    }

    impl MailSource for VecMailSource {
        fn next_message(&mut self) -> Result<Option<InboundMail>, MailError> {
            match self.queue.pop_front() {
                None if self.broken_after_queue => Err(MailError::Imap("connection reset".into())),
                next => Ok(next),
            }
        }

        fn acknowledge(&mut self, uid: u32) -> Result<(), MailError> {
            if self.rejected_acks.contains(&uid) {
                return Err(MailError::Imap(format!("STORE {uid} refused")));
            }
            self.acked.lock().unwrap().push(uid);
            Ok(())
        }

        fn finish(&mut self) -> Result<(), MailError> {
            *self.finished.lock().unwrap() = true;
            Ok(())
        }
    }

    fn artist() -> ArtistId {
        ArtistId::parse("metro_jethros").unwrap()
    }

    fn jan_first() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, 1).unwrap()
    }

    #[tokio::test]
    async fn commits_and_acknowledges_each_message() {
        let store = Arc::new(MemoryGigStore::default());
        let pipeline = GigPipeline::new(Arc::new(StubCompletion::replying(PURPLES)), store.clone());
        let (source, acked, finished) = VecMailSource::new(&[
            (7, "New gig on March 1 in Rosemont at Purples at 9pm"),
            (8, "No date in this one"),
            (9, "   "),
        ]);

        let summary = run_cycle(source, &pipeline, &artist(), jan_first()).await.unwrap();

        assert_eq!(
            summary,
            PollSummary {
                committed: 1,
                rejected: 1,
                deferred: 0,
                skipped: 1,
                unacknowledged: 0,
            }
        );
        assert_eq!(*acked.lock().unwrap(), vec![7, 8, 9]);
        assert!(*finished.lock().unwrap());
        assert_eq!(store.gigs(&artist()).await[0].date, "2025-03-01");
    }

    #[tokio::test]
    async fn retryable_failures_stay_unseen() {
        let store = Arc::new(MemoryGigStore::default());
        let pipeline = GigPipeline::new(
            Arc::new(StubCompletion::failing(CompletionError::Unavailable(
                "HTTP 503".into(),
            ))),
            store.clone(),
        );
        let (source, acked, _) = VecMailSource::new(&[(3, "March 1 at Purples")]);

        let summary = run_cycle(source, &pipeline, &artist(), jan_first()).await.unwrap();

        assert_eq!(summary.deferred, 1);
        assert!(acked.lock().unwrap().is_empty());
        assert!(store.gigs(&artist()).await.is_empty());
    }

    #[tokio::test]
    async fn failed_acknowledge_does_not_stop_the_batch() {
        let store = Arc::new(MemoryGigStore::default());
        let pipeline = GigPipeline::new(Arc::new(StubCompletion::replying(PURPLES)), store.clone());
        let (mut source, acked, finished) = VecMailSource::new(&[
            (4, "March 1 at Purples"),
            (5, "April 2 at Purples"),
        ]);
        source.rejected_acks = vec![4];

        let summary = run_cycle(source, &pipeline, &artist(), jan_first()).await.unwrap();

        assert_eq!(summary.committed, 2);
        assert_eq!(summary.unacknowledged, 1);
        assert_eq!(*acked.lock().unwrap(), vec![5]);
        assert!(*finished.lock().unwrap());
        assert_eq!(store.gigs(&artist()).await.len(), 2);
    }

    #[tokio::test]
    async fn fetch_failure_still_closes_the_source() {
        let store = Arc::new(MemoryGigStore::default());
        let pipeline = GigPipeline::new(Arc::new(StubCompletion::replying(PURPLES)), store.clone());
        let (mut source, acked, finished) = VecMailSource::new(&[(6, "March 1 at Purples")]);
        source.broken_after_queue = true;

        let err = run_cycle(source, &pipeline, &artist(), jan_first())
            .await
            .unwrap_err();

        assert!(matches!(err, MailError::Imap(_)));
        assert_eq!(*acked.lock().unwrap(), vec![6]);
        assert!(*finished.lock().unwrap());
        assert_eq!(store.gigs(&artist()).await.len(), 1);
    }

    #[test]
    fn plain_text_part_is_preferred() {
        let raw = concat!(
            "From: booker@example.com\r\n",
            "Subject: New gig\r\n",
            "Content-Type: multipart/alternative; boundary=\"XYZ\"\r\n",
            "\r\n",
            "--XYZ\r\n",
            "Content-Type: text/plain; charset=utf-8\r\n",
            "\r\n",
            "March 1 at Purples\r\n",
            "--XYZ\r\n",
            "Content-Type: text/html; charset=utf-8\r\n",
            "\r\n",
            "<p>March 1 at <b>the HTML venue</b></p>\r\n",
            "--XYZ--\r\n",
        );
        assert_eq!(extract_body(raw.as_bytes()).unwrap(), "March 1 at Purples");
    }

    #[test]
    fn html_only_mail_is_flattened() {
        let raw = concat!(
            "Subject: gig\r\n",
            "Content-Type: text/html; charset=utf-8\r\n",
            "\r\n",
            "<html><head><title>x</title></head>",
            "<body><p>March 1</p><p>at <b>Purples</b></p></body></html>\r\n",
        );
        assert_eq!(extract_body(raw.as_bytes()).unwrap(), "March 1 at Purples");
    }

    #[test]
    fn bare_message_defaults_to_plain_text() {
        let raw = "Subject: gig\r\n\r\n  New gig on March 1  \r\n";
        assert_eq!(extract_body(raw.as_bytes()).unwrap(), "New gig on March 1");
    }

    #[test]
    fn subject_filter_is_quoted() {
        assert_eq!(quote("gig"), "\"gig\"");
        assert_eq!(quote("say \"hi\""), "\"say \\\"hi\\\"\"");
    }
}
