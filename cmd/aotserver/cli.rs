use std::{
    fmt::Display,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use aotserver_cache::{CacheOffset, MethodId};
use aotserver_dispatch::{CodeBufferHint, CompileRequest, CompletionStatus, OptLevel};
use clap::{Parser as ClapParser, Subcommand as ClapSubcommand};
use eyre::{OptionExt, WrapErr};
use tokio_util::sync::CancellationToken;
use tracing::{Level, info};

use crate::initializers::{init_cache, init_dispatcher, init_tracing, lookup_target};

#[allow(clippy::upper_case_acronyms)]
#[derive(ClapParser)]
#[command(
    name = "aotserver",
    version,
    about = "Remote ahead-of-time compilation service"
)]
pub struct CLI {
    #[command(flatten)]
    pub opts: Options,
    #[command(subcommand)]
    pub command: Option<Subcommand>,
}

#[derive(ClapParser, Debug, Clone)]
pub struct Options {
    #[arg(
        long = "listen.addr",
        default_value_t = IpAddr::V4(Ipv4Addr::LOCALHOST),
        value_name = "ADDRESS",
        help = "Address the compile service listens on.",
        help_heading = "Server options",
        env = "AOTSERVER_LISTEN_ADDR"
    )]
    pub listen_addr: IpAddr,
    #[arg(
        long = "listen.port",
        default_value_t = 38400,
        value_name = "PORT",
        help = "Port the compile service listens on.",
        help_heading = "Server options",
        env = "AOTSERVER_LISTEN_PORT"
    )]
    pub listen_port: u16,
    #[arg(
        long = "listen.read-timeout",
        default_value_t = 10,
        value_name = "SECONDS",
        help = "Seconds a client may take to send its request before the stream is cancelled.",
        help_heading = "Server options",
        env = "AOTSERVER_LISTEN_READ_TIMEOUT"
    )]
    pub read_timeout_secs: u64,
    #[arg(
        long = "cache.manifest",
        value_name = "MANIFEST_PATH",
        help = "JSON manifest describing the shared cache contents.",
        long_help = "Seeds the shared cache and the set of loaded classes. Without a manifest the cache starts empty and every request fails admission.",
        help_heading = "Cache options",
        env = "AOTSERVER_CACHE_MANIFEST"
    )]
    pub cache_manifest: Option<PathBuf>,
    #[arg(
        long = "compile.workers",
        default_value_t = 1,
        value_name = "COUNT",
        help = "Number of background compile worker threads.",
        help_heading = "Compiler options",
        env = "AOTSERVER_COMPILE_WORKERS"
    )]
    pub compile_workers: usize,
    #[arg(
        long = "compile.queue",
        default_value_t = 128,
        value_name = "COUNT",
        help = "Compile jobs that may wait for a worker before new ones are refused.",
        help_heading = "Compiler options",
        env = "AOTSERVER_COMPILE_QUEUE"
    )]
    pub compile_queue: usize,
    #[arg(
        long = "plan.capacity",
        default_value_t = 64,
        value_name = "COUNT",
        help = "Maximum number of optimization plans alive at once.",
        help_heading = "Compiler options",
        env = "AOTSERVER_PLAN_CAPACITY"
    )]
    pub plan_capacity: usize,
    #[arg(
        long = "opt.max",
        default_value_t = OptLevel::Scorching,
        value_name = "OPT_LEVEL",
        help = "Highest optimization level granted to clients.",
        long_help = "Possible values: noOpt, cold, warm, hot, veryHot, scorching",
        help_heading = "Compiler options",
        env = "AOTSERVER_OPT_MAX"
    )]
    pub opt_max: OptLevel,
    #[arg(
        long = "log.level",
        default_value_t = Level::INFO,
        value_name = "LOG_LEVEL",
        env = "AOTSERVER_LOG_LEVEL",
        help = "The verbosity level used for logs.",
        long_help = "Possible values: info, debug, trace, warn, error",
        help_heading = "Server options"
    )]
    pub log_level: Level,
    #[arg(
        long = "log.color",
        default_value_t = LogColor::Auto,
        help = "Output logs with ANSI color codes.",
        long_help = "Possible values: auto, always, never",
        help_heading = "Server options",
        env = "AOTSERVER_LOG_COLOR"
    )]
    pub log_color: LogColor,
}

impl Options {
    pub fn listen_socket(&self) -> SocketAddr {
        SocketAddr::new(self.listen_addr, self.listen_port)
    }
}

impl Default for Options {
    fn default() -> Self {
        Self {
            listen_addr: IpAddr::V4(Ipv4Addr::LOCALHOST),
            listen_port: 38400,
            read_timeout_secs: 10,
            cache_manifest: None,
            compile_workers: 1,
            compile_queue: 128,
            plan_capacity: 64,
            opt_max: OptLevel::Scorching,
            log_level: Level::INFO,
            log_color: LogColor::default(),
        }
    }
}

#[derive(ClapSubcommand, Debug, Clone)]
pub enum Subcommand {
    #[command(name = "serve", about = "Run the compile service (default)")]
    Serve,
    #[command(
        name = "request",
        about = "Send one compile request to a running service and print the outcome"
    )]
    Request(RequestArgs),
}

#[derive(ClapParser, Debug, Clone)]
pub struct RequestArgs {
    #[arg(
        long = "target",
        value_name = "CLASS.METHOD",
        help = "Method to compile, looked up in --cache.manifest (e.g. demo/App.run or demo/App.run()V).",
        conflicts_with_all = ["class_offset", "method_offset"],
        required_unless_present_all = ["class_offset", "method_offset"]
    )]
    pub target: Option<String>,
    #[arg(
        long = "class-offset",
        value_name = "OFFSET",
        value_parser = parse_u64,
        requires = "method_offset",
        help = "Shared cache offset of the class (decimal or 0x-prefixed hex)."
    )]
    pub class_offset: Option<u64>,
    #[arg(
        long = "method-offset",
        value_name = "OFFSET",
        value_parser = parse_u64,
        requires = "class_offset",
        help = "Shared cache offset of the method (decimal or 0x-prefixed hex)."
    )]
    pub method_offset: Option<u64>,
    #[arg(
        long = "direct",
        value_name = "HANDLE",
        value_parser = parse_u64,
        help = "Resident method handle previously handed out by the server."
    )]
    pub direct: Option<u64>,
    #[arg(long = "opt", default_value_t = OptLevel::Warm, value_name = "OPT_LEVEL")]
    pub opt: OptLevel,
    #[arg(
        long = "code-buffer.addr",
        value_name = "ADDRESS",
        value_parser = parse_u64,
        requires = "code_buffer_size",
        help = "Address of a preallocated code buffer."
    )]
    pub code_buffer_addr: Option<u64>,
    #[arg(
        long = "code-buffer.size",
        value_name = "BYTES",
        value_parser = parse_u64,
        help = "Size of the preallocated code buffer."
    )]
    pub code_buffer_size: Option<u64>,
    #[arg(long = "timeout", default_value_t = 30, value_name = "SECONDS")]
    pub timeout_secs: u64,
}

impl RequestArgs {
    pub fn to_request(&self, opts: &Options) -> eyre::Result<CompileRequest> {
        let (class_offset, method_offset) = match (&self.target, self.class_offset, self.method_offset) {
            (Some(target), _, _) => lookup_target(opts, target)?,
            (None, Some(class), Some(method)) => (CacheOffset(class), CacheOffset(method)),
            _ => eyre::bail!("either --target or both --class-offset and --method-offset are required"),
        };
        let mut request = CompileRequest::new(class_offset, method_offset, self.opt);
        if let Some(raw) = self.direct {
            let handle = MethodId::from_raw(raw).ok_or_eyre("--direct is not a method handle")?;
            request = request.with_direct_method(handle);
        }
        if let Some(hint) = self
            .code_buffer_addr
            .and_then(|addr| CodeBufferHint::from_parts(addr, self.code_buffer_size.unwrap_or(0)))
        {
            request = request.with_code_buffer(hint);
        }
        Ok(request)
    }
}

impl Subcommand {
    pub fn run(self, opts: &Options) -> eyre::Result<()> {
        init_tracing(opts)?;

        match self {
            Subcommand::Serve => {
                let runtime = tokio::runtime::Builder::new_multi_thread()
                    .enable_all()
                    .build()
                    .wrap_err("failed to start the async runtime")?;
                runtime.block_on(serve(opts))
            }
            Subcommand::Request(args) => {
                let request = args.to_request(opts)?;
                let addr = opts.listen_socket();
                info!(
                    %addr,
                    class = %request.class_offset,
                    method = %request.method_offset,
                    opt_level = %request.opt_level,
                    "Sending compile request"
                );
                let status = aotserver_wire::client::compile(
                    addr,
                    &request,
                    Some(Duration::from_secs(args.timeout_secs)),
                )
                .wrap_err("compile request failed")?;
                println!("{status}");
                if status == CompletionStatus::Failure {
                    eyre::bail!("server reported {status}");
                }
                Ok(())
            }
        }
    }
}

async fn serve(opts: &Options) -> eyre::Result<()> {
    let built = init_cache(opts)?;
    let (dispatcher, metrics) = init_dispatcher(opts, built)?;

    let listener = aotserver_wire::bind(opts.listen_socket()).await?;
    let shutdown = CancellationToken::new();
    let server = tokio::spawn(aotserver_wire::serve_with_read_timeout(
        listener,
        dispatcher,
        shutdown.clone(),
        Duration::from_secs(opts.read_timeout_secs),
    ));

    tokio::signal::ctrl_c()
        .await
        .wrap_err("failed to listen for Ctrl+C")?;
    info!("Server shutting down");
    shutdown.cancel();
    server.await?;

    let snapshot = metrics.snapshot();
    info!(
        requests = snapshot.requests,
        queued = snapshot.queued,
        compiled = snapshot.compile_successes,
        compile_failures = snapshot.compile_failures,
        not_needed = snapshot.skipped_already_compiled,
        class_not_cached = snapshot.rejected_class_not_cached,
        method_not_found = snapshot.rejected_method_not_found,
        plans_unavailable = snapshot.plans_unavailable,
        submissions_rejected = snapshot.submissions_rejected,
        cancelled = snapshot.cancelled,
        "Dispatch totals"
    );
    Ok(())
}

fn parse_u64(raw: &str) -> Result<u64, String> {
    let parsed = match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => raw.parse(),
    };
    parsed.map_err(|err| format!("invalid number `{raw}`: {err}"))
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogColor {
    #[default]
    Auto,
    Always,
    Never,
}

impl Display for LogColor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogColor::Auto => write!(f, "auto"),
            LogColor::Always => write!(f, "always"),
            LogColor::Never => write!(f, "never"),
        }
    }
}

impl FromStr for LogColor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(LogColor::Auto),
            "always" => Ok(LogColor::Always),
            "never" => Ok(LogColor::Never),
            _ => Err(format!(
                "Invalid log color '{s}'. Expected: auto, always, or never"
            )),
        }
    }
}
