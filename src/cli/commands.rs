use std::fmt::Write as _;
use std::io::{self, Read};
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::Args;
use crossbeam_channel::{Receiver, RecvTimeoutError};

use crate::codec::{binary_to_hex, hex_to_binary};
use crate::config::AppConfig;
use crate::connection::ws::WsConnector;
use crate::connection::{ConnectionEvent, ConnectionHandle, ConnectionManager, Connector, Endpoint};
use crate::fixtures::{self, FixtureKind};
use crate::model::{Tag, TagFields, TagKey, TileId};
use crate::presenter::{Notification, NotificationKind, Presenter};
use crate::sync::{FormAction, SyncController, SyncSession};

const EVENT_POLL: Duration = Duration::from_millis(100);

#[derive(Args, Debug, Clone, Default)]
pub struct TagArgs {
    /// Electronic product code, as hex
    #[arg(long)]
    pub epc: Option<String>,
    #[arg(long)]
    pub pc_bits: Option<String>,
    #[arg(long)]
    pub length: Option<String>,
    #[arg(long)]
    pub epc_length_bits: Option<String>,
    #[arg(long)]
    pub read_data: Option<String>,
}

impl TagArgs {
    /// `None` when no field flag was given. Missing fields are sent empty.
    pub fn fields(&self) -> Option<TagFields> {
        let given = [
            &self.epc,
            &self.pc_bits,
            &self.length,
            &self.epc_length_bits,
            &self.read_data,
        ];
        if given.iter().all(|field| field.is_none()) {
            return None;
        }
        let value = |field: &Option<String>| field.clone().unwrap_or_default();
        Some(Tag::new(
            value(&self.epc),
            value(&self.pc_bits),
            value(&self.length),
            value(&self.epc_length_bits),
            value(&self.read_data),
        ))
    }
}

#[derive(Args, Debug, Clone)]
pub struct UpdateArgs {
    /// Fields of the stored tag to replace
    #[command(flatten)]
    pub original: TagArgs,
    #[arg(long)]
    pub new_epc: Option<String>,
    #[arg(long)]
    pub new_pc_bits: Option<String>,
    #[arg(long)]
    pub new_length: Option<String>,
    #[arg(long)]
    pub new_epc_length_bits: Option<String>,
    #[arg(long)]
    pub new_read_data: Option<String>,
}

impl UpdateArgs {
    /// The original with every `--new-*` flag applied.
    pub fn edited(&self, original: &Tag) -> TagFields {
        let pick = |new: &Option<String>, old: &str| new.clone().unwrap_or_else(|| old.to_string());
        Tag::new(
            pick(&self.new_epc, &original.epc),
            pick(&self.new_pc_bits, &original.pc_bits),
            pick(&self.new_length, &original.length),
            pick(&self.new_epc_length_bits, &original.epc_length_bits),
            pick(&self.new_read_data, &original.read_data),
        )
    }
}

#[derive(Args, Debug, Clone)]
pub struct GenArgs {
    /// Shape of the generated tags
    #[arg(value_enum, default_value_t = FixtureKind::Epc)]
    pub kind: FixtureKind,
    /// Number of tags to print
    #[arg(long, default_value_t = 1)]
    pub count: usize,
}

#[derive(Args, Debug, Clone)]
pub struct ConvertArgs {
    pub value: String,
}

/// How long a line-mode command waits on the server.
#[derive(Debug, Clone, Copy)]
pub struct Wait(Duration);

impl Wait {
    pub fn seconds(secs: u64) -> Self {
        Self(Duration::from_secs(secs.max(1)))
    }
}

pub fn list_tags(config: &AppConfig, wait: Wait) -> Result<()> {
    let mut client = LineClient::connect(config, wait)?;
    client.wait_for_sync()?;
    print!("{}", format_tiles(client.session.controller.store().iter()));
    Ok(())
}

pub fn add_tag(config: &AppConfig, wait: Wait, args: TagArgs) -> Result<()> {
    let fields = fields_or_stdin(&args)?;
    let mut client = LineClient::connect(config, wait)?;
    client.wait_for_sync()?;
    client.submit(FormAction::Add, &fields)
}

pub fn delete_tag(config: &AppConfig, wait: Wait, args: TagArgs) -> Result<()> {
    let fields = fields_or_stdin(&args)?;
    let mut client = LineClient::connect(config, wait)?;
    client.wait_for_sync()?;
    client.submit(FormAction::Delete, &fields)
}

pub fn update_tag(config: &AppConfig, wait: Wait, args: UpdateArgs) -> Result<()> {
    let Some(original) = args.original.fields() else {
        bail!("give the fields of the tag to update");
    };
    let edited = args.edited(&original);
    let mut client = LineClient::connect(config, wait)?;
    client.wait_for_sync()?;
    client.submit(
        FormAction::Update {
            original: original.key(),
        },
        &edited,
    )
}

pub fn generate(args: GenArgs) -> Result<()> {
    let mut rng = rand::thread_rng();
    for _ in 0..args.count {
        let tag = fixtures::random_tag(&mut rng, args.kind)?;
        println!("{}", serde_json::to_string(&tag).context("serializing tag")?);
    }
    Ok(())
}

pub fn bin_to_hex(args: ConvertArgs) -> Result<()> {
    println!("{}", binary_to_hex(args.value.trim())?);
    Ok(())
}

pub fn hex_to_bin(args: ConvertArgs) -> Result<()> {
    println!("{}", hex_to_binary(args.value.trim())?);
    Ok(())
}

fn fields_or_stdin(args: &TagArgs) -> Result<TagFields> {
    if let Some(fields) = args.fields() {
        return Ok(fields);
    }
    match read_stdin()? {
        Some(raw) => parse_tag_json(&raw),
        None => bail!("give the tag fields as flags or pipe one JSON tag on stdin"),
    }
}

fn read_stdin() -> Result<Option<String>> {
    if atty::is(atty::Stream::Stdin) {
        return Ok(None);
    }
    let mut buf = String::new();
    io::stdin().read_to_string(&mut buf)?;
    Ok(Some(buf))
}

fn parse_tag_json(raw: &str) -> Result<TagFields> {
    serde_json::from_str(raw.trim()).context("parsing tag JSON from stdin")
}

fn format_tiles<'a>(tags: impl Iterator<Item = &'a Tag>) -> String {
    let mut out = String::new();
    for tag in tags {
        let _ = writeln!(&mut out, "#{}  {}", tag.tile_id(), tag.epc);
        let _ = writeln!(
            &mut out,
            "    {}  [{}]",
            tag.summary_line(),
            tag.category().label()
        );
    }
    if out.is_empty() {
        out.push_str("No tags.\n");
    }
    out
}

/// Prints what happens to stdout/stderr instead of drawing tiles.
#[derive(Debug, Default)]
pub struct LinePresenter {
    form: TagFields,
    failures: usize,
}

impl Presenter for LinePresenter {
    fn render_tile(&mut self, tag: &Tag) -> TileId {
        let tile = tag.tile_id();
        tracing::debug!(%tile, epc = %tag.epc, "tile");
        tile
    }

    fn remove_tile(&mut self, key: &TagKey) {
        tracing::debug!(tile = %key.tile_id(), "tile removed");
    }

    fn clear_tiles(&mut self) {}

    fn read_form_fields(&self) -> TagFields {
        self.form.clone()
    }

    fn populate_form(&mut self, tag: &Tag) {
        self.form = tag.clone();
    }

    fn show_notification(&mut self, notification: Notification) {
        match notification.kind {
            NotificationKind::Success => println!("{notification}"),
            NotificationKind::Warning => eprintln!("{notification}"),
            NotificationKind::Error => {
                self.failures += 1;
                eprintln!("{notification}");
            }
            NotificationKind::Connection => tracing::info!(message = %notification.text),
        }
    }
}

/// A blocking session that handles connection events on the calling
/// thread.
struct LineClient {
    session: SyncSession<LinePresenter>,
    events: Receiver<ConnectionEvent>,
    connection: ConnectionHandle,
    endpoint: Endpoint,
    wait: Wait,
}

impl LineClient {
    fn connect(config: &AppConfig, wait: Wait) -> Result<Self> {
        let connector = WsConnector::new(config.connection.read_timeout());
        Self::with_connector(config, connector, wait)
    }

    fn with_connector<C: Connector>(config: &AppConfig, connector: C, wait: Wait) -> Result<Self> {
        let endpoint = config.endpoint();
        let (connection, events) =
            ConnectionManager::spawn(connector, endpoint.clone(), config.connection_options())
                .context("starting connection worker")?;
        let controller = SyncController::new(
            Box::new(connection.clone()),
            config.sync.pending_timeout(),
        );
        Ok(Self {
            session: SyncSession::new(controller, LinePresenter::default()),
            events,
            connection,
            endpoint,
            wait,
        })
    }

    fn wait_for_sync(&mut self) -> Result<()> {
        self.wait_until("the tag list", |session| session.controller.is_synced())
    }

    fn submit(&mut self, action: FormAction, fields: &TagFields) -> Result<()> {
        self.session.presenter.populate_form(fields);
        let failures = self.session.presenter.failures;
        let token = self.session.submit_form(action)?;
        tracing::debug!(%token, "request sent");
        self.wait_until("the server to confirm", |session| {
            !session.controller.is_pending()
        })?;
        if self.session.presenter.failures > failures {
            bail!("the server did not accept the request");
        }
        Ok(())
    }

    fn wait_until(
        &mut self,
        what: &str,
        done: impl Fn(&SyncSession<LinePresenter>) -> bool,
    ) -> Result<()> {
        let deadline = Instant::now() + self.wait.0;
        while !done(&self.session) {
            let now = Instant::now();
            if now >= deadline {
                bail!("timed out waiting for {what}");
            }
            match self.events.recv_timeout((deadline - now).min(EVENT_POLL)) {
                Ok(ConnectionEvent::GaveUp { attempts }) => {
                    self.session.handle(ConnectionEvent::GaveUp { attempts });
                    bail!("could not reach {} ({attempts} reconnect attempts)", self.endpoint);
                }
                Ok(event) => self.session.handle(event),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => bail!("connection worker stopped"),
            }
            self.session.expire_stale(Instant::now());
        }
        Ok(())
    }
}

impl Drop for LineClient {
    fn drop(&mut self) {
        self.connection.shutdown();
    }
}
