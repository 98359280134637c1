use anyhow::Context as _;
use envconfig::Envconfig;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

use flag_toolbar::config::{Config, PayloadKind};
use flag_toolbar::server::definitions::{ClientFeaturesResponse, EvaluatedTogglesResponse};
use flag_toolbar::server::{
    apply_overrides_to_definitions, apply_overrides_to_evaluated_toggles,
    get_toolbar_state_from_cookies,
};
use flag_toolbar::state::models::ToolbarState;
use flag_toolbar::storage::cookie::MemoryCookieJar;
use flag_toolbar::toolbar::Toolbar;

/// Snapshot from the request cookie when one is given, else whatever the
/// configured storage holds.
fn load_snapshot(config: &Config) -> Option<ToolbarState> {
    match &config.cookie {
        Some(header) => {
            let jar = MemoryCookieJar::from_cookie_header(header);
            get_toolbar_state_from_cookies(&jar)
        }
        None => {
            let state = Toolbar::init(config, None).engine().get_state();
            (!state.flags.is_empty()).then_some(state)
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::init_from_env().context("invalid configuration")?;

    // stdout carries the payload, so logs go to stderr.
    let log_layer = {
        let base_layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_level(true);

        if *config.debug {
            base_layer
                .with_ansi(true)
                .with_filter(EnvFilter::from_default_env())
                .boxed()
        } else {
            base_layer
                .json()
                .with_filter(EnvFilter::from_default_env())
                .boxed()
        }
    };
    tracing_subscriber::registry().with(log_layer).init();

    let mut input = String::new();
    tokio::io::stdin()
        .read_to_string(&mut input)
        .await
        .context("failed to read payload from stdin")?;

    let snapshot = load_snapshot(&config);
    info!(
        payload = %config.payload,
        has_snapshot = snapshot.is_some(),
        "applying toolbar overrides"
    );

    let output = match config.payload {
        PayloadKind::Definitions => {
            let definitions: ClientFeaturesResponse =
                serde_json::from_str(&input).context("invalid definitions payload")?;
            serde_json::to_string(&apply_overrides_to_definitions(
                &definitions,
                snapshot.as_ref(),
            ))?
        }
        PayloadKind::Toggles => {
            let mut response: EvaluatedTogglesResponse =
                serde_json::from_str(&input).context("invalid toggles payload")?;
            response.toggles =
                apply_overrides_to_evaluated_toggles(&response.toggles, snapshot.as_ref());
            serde_json::to_string(&response)?
        }
    };

    let mut stdout = tokio::io::stdout();
    stdout.write_all(output.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await?;
    Ok(())
}
