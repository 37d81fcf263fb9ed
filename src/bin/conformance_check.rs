use clap::{Parser, Subcommand};
use octofhir_conformance::{
    CheckReport, ConformanceConfig, ConformanceError, ConformanceProfileChecker, HttpFhirClient,
    MustSupportTracker, OutcomeKind, ProfileSpec, ReferenceResolutionValidator, Result,
    SearchReplyValidator, SearchRequest, SessionContext, check_access_denied, invoke_docref,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "conformance-check")]
#[command(about = "Verify a FHIR server's search replies against an implementation-guide profile")]
#[command(version)]
struct Cli {
    /// JSON run configuration
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// FHIR base URL, overrides the configuration file
    #[arg(short, long, global = true, env = "FHIR_BASE_URL")]
    base_url: Option<String>,

    /// Bearer token, overrides the configuration file
    #[arg(short, long, global = true, env = "FHIR_BEARER_TOKEN")]
    token: Option<String>,

    /// Print reports as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a search and check every returned resource
    Search {
        /// Profile description file
        #[arg(short, long)]
        profile: PathBuf,

        /// Search parameter as name=value, repeatable
        #[arg(long = "param", value_parser = parse_param)]
        params: Vec<(String, String)>,

        /// Group name for must-support coverage, usually the patient id
        #[arg(short, long, default_value = "default")]
        group: String,

        /// Treat data-absent-reason extensions as failures
        #[arg(long)]
        reject_data_absent: bool,
    },
    /// Run a search and resolve the references of its results
    References {
        #[arg(short, long)]
        profile: PathBuf,

        #[arg(long = "param", value_parser = parse_param)]
        params: Vec<(String, String)>,
    },
    /// Check that an unauthenticated search is refused
    Access {
        /// Resource type to search
        #[arg(short, long)]
        resource_type: String,

        #[arg(long = "param", value_parser = parse_param)]
        params: Vec<(String, String)>,
    },
    /// Invoke DocumentReference/$docref for a patient
    Docref {
        #[arg(short, long)]
        patient: String,
    },
}

fn parse_param(raw: &str) -> std::result::Result<(String, String), String> {
    raw.split_once('=')
        .filter(|(name, _)| !name.is_empty())
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .ok_or_else(|| format!("expected name=value, got '{raw}'"))
}

fn request_from(params: Vec<(String, String)>) -> SearchRequest {
    params
        .into_iter()
        .fold(SearchRequest::new(), |request, (name, value)| request.with(name, value))
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    let client = HttpFhirClient::from_config(&config.http)?;
    let unauthenticated = Arc::new(client.unauthenticated());
    let session = SessionContext::builder(Arc::new(client))
        .with_config(config)
        .with_unauthenticated_client(unauthenticated)
        .with_fetched_capabilities()
        .await
        .build()?;

    let reports = match cli.command {
        Commands::Search {
            profile,
            params,
            group,
            reject_data_absent,
        } => run_search(&session, &profile, params, &group, reject_data_absent).await?,
        Commands::References { profile, params } => run_references(&session, &profile, params).await?,
        Commands::Access { resource_type, params } => {
            let outcome = check_access_denied(&session, &resource_type, &request_from(params)).await;
            vec![CheckReport::with_outcomes("access control", vec![outcome])]
        }
        Commands::Docref { patient } => {
            let outcome = invoke_docref(session.client(), &patient).await;
            vec![CheckReport::with_outcomes("$docref", vec![outcome])]
        }
    };

    print_reports(&reports, cli.json)?;

    if reports.iter().any(|r| r.verdict() == OutcomeKind::Fail) {
        std::process::exit(1);
    }
    Ok(())
}

fn load_config(cli: &Cli) -> Result<ConformanceConfig> {
    let mut config = match &cli.config {
        Some(path) => ConformanceConfig::from_file(path)?,
        None => ConformanceConfig::default(),
    };
    if let Some(base_url) = &cli.base_url {
        config = config.with_base_url(base_url);
    }
    if let Some(token) = &cli.token {
        config = config.with_bearer_token(token);
    }
    if config.http.base_url.is_none() {
        return Err(ConformanceError::config(
            "no FHIR base URL: pass --base-url or set http.base_url in the configuration",
        ));
    }
    config.validate()?;
    Ok(config)
}

async fn run_search(
    session: &SessionContext,
    profile_path: &Path,
    params: Vec<(String, String)>,
    group: &str,
    reject_data_absent: bool,
) -> Result<Vec<CheckReport>> {
    let profile = ProfileSpec::from_file(profile_path)?;
    let mut request = request_from(params);

    let mut validator = SearchReplyValidator::new(session, &profile);
    if reject_data_absent {
        validator = validator.rejecting_data_absent_reasons();
    }
    let validation = validator.search_and_validate(&mut request).await;
    let collection = validation.collection(group);

    let must_support = MustSupportTracker::new()
        .coverage(&collection, &profile.must_support)
        .to_outcome(&profile.resource_type);
    let conformance = ConformanceProfileChecker::from_session(session)
        .check(&profile, &collection)
        .await;

    Ok(vec![
        validation.report(),
        CheckReport::with_outcomes("must-support", vec![must_support]),
        conformance,
    ])
}

async fn run_references(
    session: &SessionContext,
    profile_path: &Path,
    params: Vec<(String, String)>,
) -> Result<Vec<CheckReport>> {
    let profile = ProfileSpec::from_file(profile_path)?;
    let mut request = request_from(params);

    let validation = SearchReplyValidator::new(session, &profile)
        .search_and_validate(&mut request)
        .await;
    let outcomes = ReferenceResolutionValidator::from_session(session)
        .resolve_all(&validation.collection("default"))
        .await;

    Ok(vec![
        validation.report(),
        CheckReport::with_outcomes("reference resolution", outcomes),
    ])
}

fn print_reports(reports: &[CheckReport], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(reports)?);
        return Ok(());
    }
    for report in reports {
        println!("{} [{}]", report.name, report.verdict());
        for outcome in &report.outcomes {
            println!("  {outcome}");
        }
    }
    Ok(())
}
