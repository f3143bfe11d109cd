use std::{path::PathBuf, sync::Arc, time::Duration};

use clap::Parser;
use oto::{
    locate::AssetLocator,
    remux::{ExternalRemuxer, RemuxOptions, Remuxer},
    util::detect_container_source,
    HttpClient, KeyStore, KeyStoreSource, ResolveEvent, ResolveRequest, Resolver,
    ResolverOptions,
};

mod config;

use config::Config;

#[derive(Parser, Debug, Clone)]
#[clap(version, about)]
pub struct OtodlArgs {
    /// Debug output
    #[clap(long, alias = "debug")]
    verbose: bool,

    /// Config file, `./otodl.toml` when present
    #[clap(short, long, env = "OTODL_CONFIG")]
    config: Option<PathBuf>,

    /// Output file path
    #[clap(short, long, default_value = "./output.mp4")]
    output: PathBuf,

    /// Key store file
    #[clap(short, long, env = "OTODL_KEY_STORE")]
    key_store: Option<PathBuf>,

    /// Scan the key store on lookup instead of loading it into memory
    #[clap(long)]
    scan_key_store: bool,

    /// Base URL of asset descriptors, required to resolve asset ids
    #[clap(long, env = "OTODL_DESCRIPTOR_BASE")]
    descriptor_base: Option<String>,

    /// Container file name next to the asset base URL
    #[clap(long)]
    container_name: Option<String>,

    /// Temporary file path
    #[clap(long, env = "TEMP")]
    temp_dir: Option<PathBuf>,

    /// Download timeout in seconds
    #[clap(long)]
    timeout: Option<u64>,

    /// Segment probe timeout in seconds
    #[clap(long)]
    probe_timeout: Option<u64>,

    /// HTTP Header used to download
    ///
    /// Custom header. eg. "User-Agent: xxxxx".
    #[clap(short = 'H', long)]
    headers: Vec<String>,

    /// Decrypt and remux the assembled track
    #[clap(long)]
    remux: bool,

    /// Remux program, `ffmpeg` on PATH by default
    #[clap(long)]
    remux_program: Option<PathBuf>,

    /// Remuxed file path, next to the output by default
    #[clap(long)]
    remux_output: Option<PathBuf>,

    /// Asset id, container URL or container file
    source: String,
}

impl OtodlArgs {
    fn init_logging(&self) {
        let level = if self.verbose {
            tracing_subscriber::filter::LevelFilter::DEBUG
        } else {
            tracing_subscriber::filter::LevelFilter::INFO
        };

        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::builder()
                    .with_default_directive(level.into())
                    .from_env_lossy(),
            )
            .with_writer(std::io::stderr)
            .init();
    }

    fn client(&self, config: &Config) -> anyhow::Result<HttpClient> {
        let mut headers = config.headers.clone();
        headers.extend(self.headers.iter().cloned());

        let timeout = self.timeout.or(config.timeout).unwrap_or(60);
        Ok(HttpClient::with_options(
            &headers,
            Duration::from_secs(timeout),
        )?)
    }

    async fn key_store(&self, config: &Config) -> anyhow::Result<Option<KeyStoreSource>> {
        let Some(path) = self.key_store.clone().or_else(|| config.key_store.clone()) else {
            log::warn!("No key store configured, encrypted assets will fail to resolve");
            return Ok(None);
        };

        if self.scan_key_store {
            return Ok(Some(KeyStoreSource::File(path)));
        }

        let store = KeyStore::open(&path).await?;
        log::info!(
            "Loaded {} key records from {}",
            store.len(),
            path.display()
        );
        Ok(Some(KeyStoreSource::Table(Arc::new(store))))
    }

    fn resolver_options(&self, config: &Config) -> anyhow::Result<ResolverOptions> {
        let locator = match self
            .descriptor_base
            .as_deref()
            .or(config.descriptor_base.as_deref())
        {
            Some(base) => {
                let mut locator = AssetLocator::new(base.parse()?);
                if let Some(name) = self
                    .container_name
                    .as_deref()
                    .or(config.container_name.as_deref())
                {
                    locator = locator.with_container_name(name);
                }
                Some(locator)
            }
            None => None,
        };

        Ok(ResolverOptions {
            discovery: config.discovery.options(),
            probe_timeout: self
                .probe_timeout
                .or(config.probe_timeout)
                .map(Duration::from_secs),
            scratch_dir: self.temp_dir.clone().or_else(|| config.temp_dir.clone()),
            locator,
        })
    }

    fn remuxer(&self, config: &Config) -> anyhow::Result<Option<ExternalRemuxer>> {
        if !self.remux && !config.remux.enabled {
            return Ok(None);
        }

        let remuxer = match self
            .remux_program
            .as_ref()
            .or(config.remux.program.as_ref())
        {
            Some(program) => ExternalRemuxer::new(program)?,
            None => ExternalRemuxer::ffmpeg()?,
        };

        let defaults = RemuxOptions::default();
        Ok(Some(remuxer.with_options(RemuxOptions {
            key_flag: config.remux.key_flag.clone().unwrap_or(defaults.key_flag),
            extension: config.remux.extension.clone().unwrap_or(defaults.extension),
            output: self.remux_output.clone(),
        })))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = OtodlArgs::parse();
    args.init_logging();

    let config = Config::load(args.config.as_deref())?;
    // Fail before downloading anything when the remux tool is missing.
    let remuxer = args.remuxer(&config)?;

    let mut resolver = Resolver::new(args.client(&config)?)
        .with_options(args.resolver_options(&config)?);
    if let Some(store) = args.key_store(&config).await? {
        resolver = resolver.with_key_store(store);
    }

    let mut handle = resolver.spawn(ResolveRequest {
        source: detect_container_source(&args.source),
        output: args.output.clone(),
    });

    // ctrl-c handler
    let cancel = handle.cancellation_token();
    tokio::spawn(async move {
        // wait for the first ctrl-c to stop resolving
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        log::info!("Ctrl-C received, stopping.");
        cancel.cancel();

        // wait for the second ctrl-c to force exit
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("Ctrl-C received again, force exit.");
            std::process::exit(1);
        }
    });

    let mut reported = 0;
    while let Some(event) = handle.events().recv().await {
        match event {
            ResolveEvent::Progress(percent) => {
                log::debug!("Progress: {percent:.1}%");
                let bucket = (percent / 10.0) as u32;
                if bucket > reported {
                    reported = bucket;
                    log::info!("Downloaded {}%", bucket * 10);
                }
            }
            ResolveEvent::Status(message) => log::debug!("{message}"),
            ResolveEvent::Error { stage, reason } => {
                log::debug!("Failed at {stage}: {reason}");
            }
            ResolveEvent::Finished(asset) => {
                log::info!(
                    "Assembled {} segments into {}",
                    asset.segment_count,
                    asset.track.path.display()
                );
            }
        }
    }

    let asset = handle.join().await?;
    match asset.key.hex() {
        Some(key) => println!("key: {key}"),
        None => println!("key: none"),
    }
    println!("track: {}", asset.track.path.display());

    if let Some(remuxer) = remuxer {
        let output = remuxer
            .decrypt_and_remux(&asset.key, &asset.track.path)
            .await?;
        println!("output: {}", output.display());
    }

    Ok(())
}
