use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use as2send::certs::FileCertificateProvider;
use as2send::crypto::OpenSslCryptoProvider;
use as2send::dumper::Dumper;
use as2send::mdn::MicHandler;
use as2send::message::{Mic, Partnership};
use as2send::pending_store::PendingStore;
use as2send::poller::{DirectoryPoller, DirectoryPollerConfig, MissingSentMovePolicy};
use as2send::sender::{Sender, SenderConfig, TerminateHook};
use as2send::transport::{HttpTransport, TransportConfig};

#[derive(Parser)]
#[command(name = "as2send")]
#[command(author = "Adrian 'vifino' Pistol <vifino@posteo.net>")]
#[command(about = "AS2 (RFC 4130) outbox sender daemon", long_about = None)]
#[clap(version)]
struct Cli {
    /// Directory holding `<alias>.p7s` / `<alias>.key.pem` certificate material.
    certificate_directory: PathBuf,

    /// Directory polled for outgoing files.
    outbox_dir: PathBuf,

    /// Directory files are moved to after a successful send.
    #[arg(long)]
    sent_dir: Option<PathBuf>,

    /// Directory files are moved to after a failed send.
    #[arg(long, default_value = "error")]
    error_dir: PathBuf,

    /// Directory used to stage files awaiting an asynchronous MDN.
    #[arg(long)]
    pending_dir: Option<PathBuf>,

    /// Directory the pending-record store keeps `{message-id -> MIC}` state in.
    #[arg(long, default_value = "pending-store")]
    pending_store_dir: PathBuf,

    /// Optional directory raw outgoing/incoming HTTP bodies are dumped to.
    #[arg(long)]
    dump_dir: Option<PathBuf>,

    /// Partner AS2 URL.
    #[arg(long)]
    as2_url: String,

    /// Our AS2 identifier.
    #[arg(long)]
    sender_as2_id: String,

    /// Partner's AS2 identifier.
    #[arg(long)]
    receiver_as2_id: String,

    /// Certificate alias used to sign and to decrypt our own key; omit to send unsigned.
    #[arg(long)]
    sender_key_alias: Option<String>,

    /// Certificate alias used to encrypt to / verify the MDN from the partner.
    #[arg(long)]
    receiver_cert_alias: Option<String>,

    /// `key=value` config file understood by `SenderConfig::from_key_value`.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Outbox poll interval, in seconds.
    #[arg(long, default_value_t = 5)]
    poll_interval_secs: u64,
}

struct LoggingMicHandler;

impl MicHandler for LoggingMicHandler {
    fn on_mic_match(&self, message_id: &str, returned: &Mic) {
        tracing::info!(message_id, algorithm = %returned.algorithm, "MDN MIC matched");
    }

    fn on_mic_mismatch(&self, message_id: &str, original: &Mic, returned: Option<&Mic>) {
        match returned {
            Some(returned) => tracing::error!(
                message_id,
                original_algorithm = %original.algorithm,
                returned_algorithm = %returned.algorithm,
                "MDN MIC mismatch"
            ),
            None => tracing::error!(
                message_id,
                original_algorithm = %original.algorithm,
                "MDN carried no Received-Content-MIC"
            ),
        }
    }
}

struct LoggingTerminateHook;

impl TerminateHook for LoggingTerminateHook {
    fn terminate(&self, message_id: &str, error: &as2send::As2Error) {
        tracing::error!(message_id, %error, "message terminated");
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let sender_config = match &cli.config {
        Some(path) => {
            let text = std::fs::read_to_string(path).expect("cannot read config file");
            SenderConfig::from_key_value(&text)
        }
        None => SenderConfig::default(),
    };

    let partnership = Arc::new(Partnership {
        sender_as2_id: cli.sender_as2_id,
        receiver_as2_id: cli.receiver_as2_id,
        as2_url: cli.as2_url,
        sign_algorithm: None,
        encrypt_algorithm: None,
        compression: None,
        compress_before_sign: false,
        mdn_mode: as2send::message::MdnMode::None,
        mdn_options: None,
        disposition_notification_to: None,
        content_transfer_encoding: "binary".to_string(),
        sender_key_alias: cli.sender_key_alias,
        receiver_cert_alias: cli.receiver_cert_alias,
        include_certificate_in_signed_content: true,
        use_rfc3851_mic_names: false,
        quote_header_values: false,
        retry_count: sender_config.default_retry_count,
    });
    partnership.validate().expect("invalid partnership configuration");

    let transport_config = TransportConfig {
        connect_timeout: sender_config.connect_timeout,
        read_timeout: sender_config.read_timeout,
        ..TransportConfig::default()
    };
    let transport = HttpTransport::new(&transport_config).expect("cannot build HTTP client");

    let crypto = OpenSslCryptoProvider;
    let certs = FileCertificateProvider::new(cli.certificate_directory);
    let mic_handler = LoggingMicHandler;
    let terminate_hook = LoggingTerminateHook;
    let pending_store = PendingStore::new(cli.pending_store_dir);
    let dump_dir = cli
        .dump_dir
        .clone()
        .or_else(|| std::env::var_os("AS2.httpDumpDirectoryOutgoing").map(PathBuf::from));
    let file_dumper = dump_dir.map(as2send::dumper::FileDumper::new);

    let mut sender = Sender::new(transport, &crypto, &certs, &mic_handler)
        .with_pending_store(&pending_store)
        .with_terminate_hook(&terminate_hook);
    if let Some(dumper) = &file_dumper {
        sender = sender.with_dumper(dumper as &dyn Dumper);
    }

    let poller_config = DirectoryPollerConfig {
        outbox_dir: cli.outbox_dir,
        error_dir: cli.error_dir,
        sent_dir: cli.sent_dir,
        pending_dir: cli.pending_dir,
        mime_type: "application/octet-stream".to_string(),
        send_filename: true,
        missing_sent_move_policy: MissingSentMovePolicy::LogAndContinue,
    };
    let mut poller = DirectoryPoller::new(poller_config, partnership);

    let mut ticker = tokio::time::interval(Duration::from_secs(cli.poll_interval_secs));
    loop {
        ticker.tick().await;
        match poller.poll(&sender).await {
            Ok(outcomes) => {
                for outcome in outcomes {
                    tracing::debug!(?outcome, "poll outcome");
                }
            }
            Err(e) => tracing::error!(error = %e, "poll cycle failed"),
        }
    }
}
