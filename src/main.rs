use clap::Parser;
use course_registry::config::DatabaseBackend;
use course_registry::core::scenario::ScenarioReport;
use course_registry::utils::{logger, validation::Validate};
use course_registry::{
    run_scenario, CliConfig, MemoryCourseService, MemoryDatabase, RegistryConfig, RegistryError,
    ScenarioConfig,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = CliConfig::parse();

    // 載入設定；未指定時使用記憶體後端
    let config = match &cli.config {
        Some(path) => match RegistryConfig::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("❌ Failed to load config file '{}': {}", path, e);
                eprintln!("💡 Make sure the file exists and is valid TOML format");
                std::process::exit(1);
            }
        },
        None => RegistryConfig::in_memory(),
    };

    // 初始化日誌
    if cli.json_logs {
        logger::init_json_logger(if cli.verbose { "debug" } else { "info" });
    } else {
        logger::init_from_config(&config.logging(), cli.verbose);
    }

    tracing::info!("🚀 Starting {}", config.service.name);

    // 驗證配置
    if let Err(e) = cli.validate().and_then(|_| config.validate()) {
        exit_with(&e);
    }

    tracing::info!("📁 Loading scenario from: {}", cli.scenario);
    let scenario = ScenarioConfig::from_file(&cli.scenario).unwrap_or_else(|e| exit_with(&e));
    if let Err(e) = scenario.validate() {
        exit_with(&e);
    }

    display_plan(&scenario);
    if cli.dry_run {
        tracing::info!("🔍 DRY RUN MODE - No steps will be executed");
        return Ok(());
    }

    let report = match config.database.backend {
        DatabaseBackend::Memory => run_in_memory(&scenario).await,
        DatabaseBackend::Postgres => run_on_postgres(&config, &scenario).await?,
    };

    display_report(&report);

    if let Some(path) = &cli.report {
        std::fs::write(path, report.to_json()?)?;
        tracing::info!("📝 Report written to: {}", path);
    }

    if !report.passed() {
        std::process::exit(1);
    }
    Ok(())
}

fn exit_with(e: &RegistryError) -> ! {
    tracing::error!(
        "❌ {} (Category: {:?}, Severity: {:?})",
        e,
        e.category(),
        e.severity()
    );
    eprintln!("❌ {}", e.user_friendly_message());
    eprintln!("💡 Suggestion: {}", e.recovery_suggestion());
    std::process::exit(2);
}

async fn run_in_memory(scenario: &ScenarioConfig) -> ScenarioReport {
    let database = MemoryDatabase::new();
    for user in &scenario.users {
        database.upsert_user(user).await;
    }
    for subject in &scenario.subjects {
        database.upsert_subject(subject).await;
    }
    let service = MemoryCourseService::in_memory(database);
    run_scenario(&service, scenario).await
}

#[cfg(feature = "postgres")]
async fn run_on_postgres(
    config: &RegistryConfig,
    scenario: &ScenarioConfig,
) -> anyhow::Result<ScenarioReport> {
    use course_registry::{CourseService, PgDatabase};

    let database = PgDatabase::connect(&config.database).await?;
    database.initialize_schema().await?;
    for user in &scenario.users {
        database.upsert_user(user).await?;
    }
    for subject in &scenario.subjects {
        database.upsert_subject(subject).await?;
    }

    let service = CourseService::new(
        database.clone(),
        database.clone(),
        database.clone(),
        database.clone(),
    );
    let report = run_scenario(&service, scenario).await;
    database.close().await;
    Ok(report)
}

#[cfg(not(feature = "postgres"))]
async fn run_on_postgres(
    _config: &RegistryConfig,
    _scenario: &ScenarioConfig,
) -> anyhow::Result<ScenarioReport> {
    anyhow::bail!("the postgres backend requires building with `--features postgres`")
}

fn display_plan(scenario: &ScenarioConfig) {
    tracing::info!(
        "📋 Scenario '{}': {} users, {} steps",
        scenario.scenario.name,
        scenario.users.len(),
        scenario.steps.len()
    );
    if let Some(description) = &scenario.scenario.description {
        tracing::info!("   {}", description);
    }
    for (index, step) in scenario.steps.iter().enumerate() {
        tracing::debug!(
            "   {}. {} by {} (expect {})",
            index + 1,
            step.action.name(),
            step.actor,
            step.expected()
        );
    }
}

fn display_report(report: &ScenarioReport) {
    let elapsed = report.finished_at - report.started_at;
    println!(
        "Scenario '{}' finished in {} ms",
        report.name,
        elapsed.num_milliseconds()
    );
    for outcome in &report.outcomes {
        let mark = if outcome.passed { "✅" } else { "❌" };
        println!(
            "{} {:>3}. {:<16} by {:<6} expected {:<24} got {}",
            mark, outcome.index, outcome.action, outcome.actor, outcome.expected, outcome.actual
        );
        if !outcome.passed {
            if let Some(detail) = &outcome.detail {
                println!("        {}", detail);
            }
        }
    }
    println!(
        "{} passed, {} failed",
        report.outcomes.len() - report.failed_count(),
        report.failed_count()
    );
}
