//! Shared command plumbing: global flags and resolver construction.

use std::sync::Arc;

use anyhow::{bail, Context as _, Result};

use crate::config::Config;
use crate::download::HttpDownloader;
use crate::eval::NixEvaluator;
use crate::fetch::Fetcher;
use crate::flake::Resolver;
use crate::flake_ref::FlakeRef;
use crate::git::Git2Exporter;
use crate::registry::{Registries, Registry};
use crate::store::Store;

/// Global flags shared by every subcommand.
#[derive(Debug, Clone, Default)]
pub struct GlobalOpts {
    /// Forbid mutable references outside the impure top-level.
    pub pure: bool,
    /// `--override-flake FROM=TO` pairs feeding the flag registry.
    pub override_flake: Vec<String>,
}

/// Parse `--override-flake` pairs into the flag registry.
pub fn flag_registry(overrides: &[String]) -> Result<Registry> {
    let mut registry = Registry::new();
    for pair in overrides {
        let Some((from, to)) = pair.split_once('=') else {
            bail!("--override-flake takes FROM=TO, got '{}'", pair);
        };
        let from: FlakeRef = from
            .parse()
            .with_context(|| format!("invalid override source '{}'", from))?;
        let to: FlakeRef = to
            .parse()
            .with_context(|| format!("invalid override target '{}'", to))?;
        registry.set(from, to);
    }
    Ok(registry)
}

/// Everything a command needs to resolve flakes. Owns the store and the
/// transports; `resolver()` borrows them into a `Resolver`.
pub struct Context {
    pub config: Config,
    pub store: Arc<Store>,
    pub registries: Registries,
    pub pure: bool,
    downloader: HttpDownloader,
    exporter: Git2Exporter,
    evaluator: NixEvaluator,
}

impl Context {
    pub fn new(globals: &GlobalOpts) -> Result<Context> {
        let config = Config::from_env();
        let store = Arc::new(
            Store::open(&config.store_dir)
                .with_context(|| format!("cannot open store at {}", config.store_dir.display()))?,
        );

        let flag = flag_registry(&globals.override_flake)?;
        let registries = Registries::load(&config, globals.pure, flag)?;

        let downloader = HttpDownloader::new(store.clone(), &config.cache_dir);
        let exporter = Git2Exporter::new(store.clone(), &config.cache_dir);

        Ok(Context {
            downloader,
            exporter,
            evaluator: NixEvaluator::default(),
            registries,
            pure: globals.pure,
            store,
            config,
        })
    }

    pub fn resolver(&self) -> Resolver<'_> {
        Resolver {
            registries: self.registries.clone(),
            store: &self.store,
            fetcher: Fetcher::new(&self.downloader, &self.exporter, self.config.tarball_ttl),
            evaluator: &self.evaluator,
            pure: self.pure,
        }
    }
}

/// Expand `~` and parse a user-supplied reference string.
pub fn parse_reference(input: &str) -> Result<FlakeRef> {
    let expanded = shellexpand::tilde(input);
    expanded
        .parse()
        .with_context(|| format!("failed to parse flake reference '{}'", input))
}
