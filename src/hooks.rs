//! Host adapter.
//!
//! A DHCP server embeds the engine through three entry points: [`Hooks::load`]
//! once at startup, [`Hooks::on_receive`] when a request arrives and
//! [`Hooks::on_send`] when the reply is about to leave. The two callouts of
//! one request share a [`RequestContext`], which is how the assignment made
//! on receive reaches the reply.
//!
//! The host owns the packet. It only has to expose the few mutations in
//! [`OutgoingPacket`].

use std::net::Ipv4Addr;

use tracing::{info, info_span};
use tracing_subscriber::EnvFilter;

use crate::VERSION;
use crate::config::Config;
use crate::engine::{Assignment, LeaseEngine};
use crate::error::Result;
use crate::options::DhcpOption;

/// Name diagnostics are emitted under.
pub const DIAGNOSTICS_NAME: &str = "kvlease";

/// Verbosity used when `RUST_LOG` is not set.
pub const DIAGNOSTICS_LEVEL: &str = "debug";

/// Installs the process-wide subscriber.
///
/// `RUST_LOG` takes precedence over the fixed default. Calling this when a
/// subscriber is already installed does nothing.
pub fn init_diagnostics() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{}={}", DIAGNOSTICS_NAME, DIAGNOSTICS_LEVEL)));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// What the host should do after [`Hooks::on_receive`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalloutStatus {
    /// An address was assigned; continue with the reply.
    Continue,
    /// No assignment; the host applies its own handling.
    Skip,
}

/// Per-request state carried from receive to send.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    mac: Option<String>,
    assignment: Option<Assignment>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mac(&self) -> Option<&str> {
        self.mac.as_deref()
    }

    pub fn assignment(&self) -> Option<&Assignment> {
        self.assignment.as_ref()
    }
}

/// Mutations the engine performs on the host's outgoing packet.
pub trait OutgoingPacket {
    fn set_yiaddr(&mut self, address: Ipv4Addr);
    fn remove_option(&mut self, code: u8);
    fn add_option(&mut self, option: DhcpOption);
}

/// A bare reply: the offered address and an ordered option list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub yiaddr: Ipv4Addr,
    pub options: Vec<DhcpOption>,
}

impl Default for Reply {
    fn default() -> Self {
        Self {
            yiaddr: Ipv4Addr::UNSPECIFIED,
            options: Vec::new(),
        }
    }
}

impl Reply {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn option(&self, code: u8) -> Option<&DhcpOption> {
        self.options
            .iter()
            .find(|option| option.option_code() == code)
    }

    /// Options in wire format, in order.
    pub fn encode_options(&self) -> Vec<u8> {
        self.options.iter().flat_map(DhcpOption::encode).collect()
    }
}

impl OutgoingPacket for Reply {
    fn set_yiaddr(&mut self, address: Ipv4Addr) {
        self.yiaddr = address;
    }

    fn remove_option(&mut self, code: u8) {
        self.options.retain(|option| option.option_code() != code);
    }

    fn add_option(&mut self, option: DhcpOption) {
        self.options.push(option);
    }
}

/// The loaded engine, as seen by the host.
pub struct Hooks {
    engine: LeaseEngine,
}

impl Hooks {
    /// Initialises diagnostics, opens the configured store and builds the
    /// engine.
    pub async fn load(config: &Config) -> Result<Self> {
        init_diagnostics();
        config.validate()?;

        let store = config.open_store().await?;
        let engine = LeaseEngine::new(store, config.settings())
            .with_span(info_span!("kvlease", version = VERSION));

        info!("kvlease {} loaded, store: {:?}", VERSION, config.store);
        Ok(Self { engine })
    }

    /// Wraps an already built engine.
    pub fn with_engine(engine: LeaseEngine) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &LeaseEngine {
        &self.engine
    }

    /// Flushes store state that is only held in memory.
    pub async fn unload(self) -> Result<()> {
        self.engine.store().flush().await?;
        info!("kvlease {} unloaded", VERSION);
        Ok(())
    }

    /// Resolves an address for `mac` and records it in `context`.
    pub async fn on_receive(&self, context: &mut RequestContext, mac: &str) -> CalloutStatus {
        context.mac = Some(mac.to_string());
        match self.engine.allocate(mac).await {
            Ok(assignment) => {
                context.assignment = Some(assignment);
                CalloutStatus::Continue
            }
            Err(_) => {
                context.assignment = None;
                CalloutStatus::Skip
            }
        }
    }

    /// Writes the assignment recorded in `context` into `packet`.
    ///
    /// Each option replaces any option of the same code already present.
    /// Without an assignment the packet is left untouched.
    pub fn on_send(&self, context: &RequestContext, packet: &mut impl OutgoingPacket) {
        let Some(assignment) = &context.assignment else {
            return;
        };

        for option in &assignment.options {
            packet.remove_option(option.option_code());
            packet.add_option(option.clone());
        }
        packet.set_yiaddr(assignment.address);
    }
}
