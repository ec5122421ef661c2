use anyhow::{Context, Result};
use clap::Parser;
use object_store::aws::AmazonS3Builder;
use object_store::ObjectStore;
use secrecy::ExposeSecret;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use harvester::bus::{
    self, GetFileHandler, NatsPublisher, PostEvents, RefetchHandler, RequestHandler,
    TriggerSyncHandler, ValidateHandler, WarmHandler,
};
use harvester::config::{Config, S3Config, TelegramConfig};
use harvester::feed::DiscoveryPipeline;
use harvester::http::{Fetcher, FetcherConfig, RobotsPolicy, SWEEP_INTERVAL};
use harvester::media::{FileSource, MediaWarmer, NatsFileSource, WarmerConfig};
use harvester::moderation::ModerationClient;
use harvester::poller::{ChannelPoller, CycleStats, Engine, Ingest, RssPoller, WebPoller};
use harvester::storage::{PgRepository, Repository};
use harvester::telegram::{MessageParser, TelegramClient, TelegramFileService};
use harvester::validation::SourceValidator;

/// How long a warm batch waits on a remote `telegram.get_file` reply.
const REMOTE_FILE_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Parser, Debug)]
#[command(
    name = "harvester",
    about = "Polls feeds, web pages and Telegram channels and publishes new posts to NATS"
)]
struct Args {
    /// TOML configuration file (environment variables override it)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Run one poll cycle of every enabled engine and exit
    #[arg(long)]
    once: bool,

    /// Disable the syndication engine
    #[arg(long)]
    no_rss: bool,

    /// Disable the web engine
    #[arg(long)]
    no_web: bool,

    /// Disable the Telegram client and channel engine
    #[arg(long)]
    no_telegram: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is fine; real deployments use the process environment
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = Config::load(args.config.as_deref()).context("Failed to load configuration")?;

    let database_url = config
        .database
        .url
        .as_deref()
        .context("DATABASE_URL is required")?;
    let pg = PgRepository::connect(
        database_url,
        config.database.pool_min,
        config.database.pool_max,
    )
    .await
    .context("Failed to connect to the database")?;
    let repo: Arc<dyn Repository> = Arc::new(pg.clone());

    let nats = async_nats::connect(&config.nats.url)
        .await
        .with_context(|| format!("Failed to connect to NATS at {}", config.nats.url))?;
    let publisher = NatsPublisher::new(nats.clone());
    if let Err(e) = publisher.ensure_stream().await {
        tracing::warn!(error = %e, "Could not ensure the posts stream; publishing may fail");
    }
    let events = PostEvents::new(Arc::new(publisher), config.nats.publish_enabled);
    let ingest = Ingest::new(
        repo.clone(),
        ModerationClient::from_config(&config.moderation),
        events,
    );

    let cancel = CancellationToken::new();
    let fetcher = Fetcher::new(FetcherConfig::from_config(&config))
        .context("Failed to build the HTTP client")?;
    let sweeper = fetcher
        .cache()
        .map(|cache| cache.spawn_sweeper(SWEEP_INTERVAL, cancel.clone()));
    let discovery = Arc::new(DiscoveryPipeline::new(fetcher.clone()));

    let telegram = if args.no_telegram {
        None
    } else {
        connect_telegram(&config.telegram).await
    };

    let rss = (config.rss.polling_enabled && !args.no_rss).then(|| {
        Engine::new(RssPoller::new(
            config.rss.clone(),
            fetcher.clone(),
            ingest.clone(),
        ))
    });
    let web = (config.web.polling_enabled && !args.no_web).then(|| {
        let poller = WebPoller::new(
            config.web.clone(),
            fetcher.clone(),
            discovery.clone(),
            ingest.clone(),
        );
        let poller = if config.scraping.respect_robots {
            poller.with_robots(RobotsPolicy::new(fetcher.clone()))
        } else {
            poller
        };
        Engine::new(poller)
    });
    let channel = telegram
        .clone()
        .filter(|_| config.telegram.polling_enabled)
        .map(|client| {
            Engine::new(ChannelPoller::new(
                config.telegram.clone(),
                client,
                ingest.clone(),
            ))
        });

    if args.once {
        if let Some(engine) = &rss {
            log_stats("syndication", engine.poll_cycle(&cancel).await);
        }
        if let Some(engine) = &web {
            log_stats("web", engine.poll_cycle(&cancel).await);
        }
        if let Some(engine) = &channel {
            log_stats("channel", engine.poll_cycle(&cancel).await);
        }
    } else {
        let handlers = build_handlers(
            &config,
            &nats,
            &repo,
            &fetcher,
            &discovery,
            telegram.as_ref(),
            channel.as_ref().map(|e| e.waker()),
        )?;
        let mut responders = JoinSet::new();
        for handler in handlers {
            responders.spawn(bus::serve(nats.clone(), handler, cancel.clone()));
        }

        if let Some(engine) = &rss {
            engine.start(&cancel);
        }
        if let Some(engine) = &web {
            engine.start(&cancel);
        }
        if let Some(engine) = &channel {
            engine.start(&cancel);
        }
        tracing::info!("Harvester running, press Ctrl-C to stop");

        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for Ctrl-C")?;
        tracing::info!("Shutting down");
        cancel.cancel();

        if let Some(engine) = &rss {
            engine.stop().await;
        }
        if let Some(engine) = &web {
            engine.stop().await;
        }
        if let Some(engine) = &channel {
            engine.stop().await;
        }
        while let Some(joined) = responders.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::error!(error = %e, "Responder failed to subscribe"),
                Err(e) => tracing::error!(error = %e, "Responder task failed"),
            }
        }
    }

    cancel.cancel();
    if let Some(sweeper) = sweeper {
        sweeper.await.ok();
    }
    if let Some(client) = &telegram {
        client.close().await;
    }
    pg.close().await;
    if let Err(e) = nats.flush().await {
        tracing::warn!(error = %e, "Failed to flush NATS");
    }
    tracing::info!("Goodbye");
    Ok(())
}

fn log_stats(family: &str, stats: CycleStats) {
    tracing::info!(
        family,
        sources = stats.sources,
        success = stats.success,
        errors = stats.errors,
        flood_waits = stats.flood_waits,
        total_posts = stats.total_posts,
        "Single cycle finished"
    );
}

fn build_handlers(
    config: &Config,
    nats: &async_nats::Client,
    repo: &Arc<dyn Repository>,
    fetcher: &Fetcher,
    discovery: &Arc<DiscoveryPipeline>,
    telegram: Option<&Arc<TelegramClient>>,
    channel_waker: Option<Arc<tokio::sync::Notify>>,
) -> Result<Vec<Arc<dyn RequestHandler>>> {
    let mut handlers: Vec<Arc<dyn RequestHandler>> = Vec::new();

    let validator = SourceValidator::new(fetcher.clone(), discovery.clone(), telegram.cloned());
    handlers.push(Arc::new(ValidateHandler::new(Arc::new(validator))));
    handlers.push(Arc::new(TriggerSyncHandler::new(repo.clone(), channel_waker)));

    let files = telegram.map(|client| {
        Arc::new(TelegramFileService::new(
            client.clone(),
            MessageParser::new(config.telegram.media_base_url.clone()),
        ))
    });
    if let Some(files) = &files {
        handlers.push(Arc::new(GetFileHandler::new(files.clone())));
        handlers.push(Arc::new(RefetchHandler::new(files.clone())));
    }

    if config.media_warming.enabled {
        match build_store(&config.s3)? {
            Some(store) => {
                let source: Arc<dyn FileSource> = match files {
                    Some(files) => files,
                    None => Arc::new(NatsFileSource::new(nats.clone(), REMOTE_FILE_TIMEOUT)),
                };
                let warmer = MediaWarmer::new(store, source, WarmerConfig::from(&config.media_warming));
                handlers.push(Arc::new(WarmHandler::new(Arc::new(warmer))));
            }
            None => tracing::warn!("Media warming enabled but S3_BUCKET is not set; skipping"),
        }
    }

    Ok(handlers)
}

fn build_store(s3: &S3Config) -> Result<Option<Arc<dyn ObjectStore>>> {
    let Some(bucket) = s3.bucket.as_deref() else {
        return Ok(None);
    };
    let mut builder = AmazonS3Builder::new()
        .with_bucket_name(bucket)
        .with_allow_http(s3.allow_http);
    if let Some(region) = &s3.region {
        builder = builder.with_region(region);
    }
    if let Some(endpoint) = &s3.endpoint {
        builder = builder.with_endpoint(endpoint);
    }
    if let Some(key_id) = &s3.access_key_id {
        builder = builder.with_access_key_id(key_id);
    }
    if let Some(secret) = &s3.secret_access_key {
        builder = builder.with_secret_access_key(secret.expose_secret());
    }
    let store = builder.build().context("Failed to configure S3")?;
    Ok(Some(Arc::new(store)))
}

#[cfg(feature = "grammers")]
async fn connect_telegram(config: &TelegramConfig) -> Option<Arc<TelegramClient>> {
    use harvester::telegram::grammers::GrammersConnector;
    use harvester::telegram::{MemoryChannelCache, SessionStore};

    let Some(api_hash) = config.api_hash.clone() else {
        tracing::warn!("TELEGRAM_API_HASH not set; channel polling disabled");
        return None;
    };
    let session = SessionStore::new(config.session_path());
    if !session.exists() {
        tracing::warn!(
            path = %session.path().display(),
            "No Telegram session file; channel polling disabled"
        );
        return None;
    }

    let client = TelegramClient::new(
        Arc::new(GrammersConnector::new(config.api_id, api_hash)),
        session,
    )
    .with_channel_cache(Arc::new(MemoryChannelCache::new(Duration::from_secs(
        config.channel_cache_ttl_seconds,
    ))));
    match client.connect().await {
        Ok(()) => {
            tracing::info!("Telegram client connected");
            Some(Arc::new(client))
        }
        Err(e) => {
            tracing::warn!(error = %e, "Telegram connection failed; channel polling disabled");
            None
        }
    }
}

#[cfg(not(feature = "grammers"))]
async fn connect_telegram(config: &TelegramConfig) -> Option<Arc<TelegramClient>> {
    if config.polling_enabled {
        tracing::warn!("Built without the `grammers` feature; channel polling disabled");
    }
    None
}
