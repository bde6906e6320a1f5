use chrono::Utc;
use clap::Parser;
use geofeed_finder::core::fetcher::build_http_client;
use geofeed_finder::core::ConfigProvider;
use geofeed_finder::utils::{logger, validation::Validate};
use geofeed_finder::{
    ArinRdapSource, BulkPipeline, CacheStore, CliConfig, FileConfig, FinderEngine, FinderError,
    LocalStorage, PrefixPipeline, RegistryDumpSource, Settings, WhoisClient,
};
use std::sync::Arc;

fn exit_with(e: &FinderError) -> ! {
    tracing::error!(
        "Run failed: {} (Category: {:?}, Severity: {:?})",
        e,
        e.category(),
        e.severity()
    );
    eprintln!("{}", e.user_friendly_message());
    eprintln!("Suggestion: {}", e.recovery_suggestion());
    std::process::exit(e.exit_code());
}

async fn run(settings: Settings) -> geofeed_finder::Result<Option<String>> {
    let now = Utc::now();
    let cache = Arc::new(CacheStore::load(settings.cache_dir()).await);
    let client = build_http_client(&settings)?;

    if let Some(prefix) = settings.parsed_test_prefix()? {
        let whois = WhoisClient::new(settings.download_timeout());
        let pipeline = PrefixPipeline::new(&settings, whois, prefix, client, cache, now);
        FinderEngine::new_with_monitoring(pipeline, settings.monitor)
            .run()
            .await?;
        return Ok(None);
    }

    let mut source = RegistryDumpSource::new(
        client.clone(),
        Arc::clone(&cache),
        settings.active_dumps(),
        now,
    );
    if settings.arin_live() {
        let arin = ArinRdapSource::new(client.clone(), Arc::clone(&cache), &settings, now)
            .with_endpoints(settings.arin_stats_url.clone(), settings.arin_rdap_url.clone());
        source = source.with_live_arin(arin);
    }
    let monitor = settings.monitor;
    let pipeline = BulkPipeline::new(LocalStorage::default(), settings, source, client, cache, now);
    let output_path = FinderEngine::new_with_monitoring(pipeline, monitor)
        .run()
        .await?;

    Ok(Some(output_path))
}

#[tokio::main]
async fn main() {
    let cli = CliConfig::parse();
    logger::init_cli_logger(cli.verbose, cli.silent);

    tracing::debug!("CLI config: {:?}", cli);

    let file = match cli.config_file.as_ref().map(FileConfig::from_file).transpose() {
        Ok(file) => file,
        Err(e) => exit_with(&e),
    };
    let settings = match Settings::resolve(&cli, file) {
        Ok(settings) => settings,
        Err(e) => exit_with(&e),
    };
    if let Err(e) = settings.validate() {
        tracing::error!("Configuration validation failed: {}", e);
        exit_with(&e);
    }
    if settings.monitor {
        tracing::info!("System monitoring enabled");
    }

    match run(settings).await {
        Ok(Some(output_path)) => println!("Done! See {}", output_path),
        Ok(None) => {}
        Err(e) => exit_with(&e),
    }
}
