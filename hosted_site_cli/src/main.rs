use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use hosted_site::deploy::{self, aws::AwsProvisioner, Provisioner};
use hosted_site::parsing::{load_site_file, SiteFile};
use hosted_site::resources::CLOUDFRONT_CERTIFICATE_REGION;
use hosted_site::variables::{apply_overrides, load_dot_env};
use hosted_site::{HostedZone, SiteProps, StackContext};

const SITE_FILE_NAME: &str = "site.toml";

#[derive(Parser, Debug)]
#[command(name = "hosted-site", version, about = "Deploy a static site to S3 + CloudFront + Route53")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// overrides [stack].name
    #[arg(long, global = true)]
    stack_name: Option<String>,

    /// overrides [stack].region
    #[arg(long, global = true)]
    region: Option<String>,

    /// overrides [stack].account
    #[arg(long, global = true)]
    account: Option<String>,

    /// -v for debug logs, -vv for debug logs from every crate
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Args, Debug, Clone)]
struct SiteArgs {
    /// site file. searched for in the current and parent directories if omitted
    #[arg(long)]
    config: Option<PathBuf>,

    /// .env file whose values override the site file
    #[arg(long)]
    env: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the CloudFormation template
    Synth {
        #[command(flatten)]
        site: SiteArgs,
        /// skip the route53 lookup and use this hosted zone id
        #[arg(long)]
        zone_id: Option<String>,
        /// write the template to this file instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Deploy the stack, upload the assets and invalidate the distribution
    Deploy {
        #[command(flatten)]
        site: SiteArgs,
    },
    /// Delete the stack and everything in it
    Destroy {
        #[command(flatten)]
        site: SiteArgs,
    },
}

/// given a search dir, see if site.toml exists in this dir, and if so, return
/// the path to it. If not found, back up 1 dir at a time (limit 5 times)
fn find_closest_site_file(mut search_dir: PathBuf) -> Option<PathBuf> {
    for _ in 0..5 {
        let candidate = search_dir.join(SITE_FILE_NAME);
        if candidate.is_file() {
            return Some(candidate);
        }
        if !search_dir.pop() {
            break;
        }
    }
    None
}

struct Settings {
    context: StackContext,
    props: SiteProps,
}

fn resolve_settings(cli: &Cli, site: &SiteArgs, start_dir: &Path) -> anyhow::Result<Settings> {
    let config = match &site.config {
        Some(c) => c.clone(),
        None => find_closest_site_file(start_dir.to_path_buf())
            .ok_or_else(|| anyhow!("Failed to find {SITE_FILE_NAME} from {:?}. Pass --config", start_dir))?,
    };
    let SiteFile { site: props, stack } = {
        let mut file = load_site_file(&config).with_context(|| format!("loading {}", config.display()))?;
        if let Some(env_path) = &site.env {
            let env = load_dot_env(env_path)?;
            apply_overrides(&mut file, &env);
        }
        file
    };
    let stack_name = cli.stack_name.clone()
        .or(stack.name)
        .ok_or_else(|| anyhow!("No stack name. Set [stack].name, STACK_NAME or --stack-name"))?;
    let region = cli.region.clone()
        .or(stack.region)
        .unwrap_or_else(|| CLOUDFRONT_CERTIFICATE_REGION.to_string());
    let mut context = StackContext::new(stack_name, region);
    if let Some(account) = cli.account.clone().or(stack.account) {
        context = context.with_account(account);
    }
    Ok(Settings { context, props })
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "hosted_site=info,hosted_site_cli=info",
        1 => "hosted_site=debug,hosted_site_cli=debug",
        _ => "debug",
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

async fn synth(settings: Settings, zone_id: Option<String>, out: Option<PathBuf>) -> anyhow::Result<()> {
    let zone = match zone_id {
        Some(id) => HostedZone::new(&id, &settings.props.zone_name),
        None => {
            let provisioner = AwsProvisioner::new(&settings.context.region).await;
            provisioner.lookup_zone(&settings.props.zone_name).await?
        }
    };
    let (site, template) = deploy::synth_site(settings.context, settings.props, &zone)?;
    let body = template.to_json_pretty()?;
    match out {
        Some(path) => {
            std::fs::write(&path, body).with_context(|| format!("writing {}", path.display()))?;
            info!(path = %path.display(), domain = site.domain_name(), "wrote template");
        }
        None => println!("{body}"),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let cwd = std::env::current_dir().context("Failed to get current directory")?;

    match &cli.command {
        Command::Synth { site, zone_id, out } => {
            let settings = resolve_settings(&cli, site, &cwd)?;
            synth(settings, zone_id.clone(), out.clone()).await?;
        }
        Command::Deploy { site } => {
            let settings = resolve_settings(&cli, site, &cwd)?;
            let provisioner = AwsProvisioner::new(&settings.context.region).await;
            let outcome = deploy::deploy_site(&provisioner, settings.context, settings.props).await?;
            println!("https://{}", outcome.domain_name);
        }
        Command::Destroy { site } => {
            let settings = resolve_settings(&cli, site, &cwd)?;
            let provisioner = AwsProvisioner::new(&settings.context.region).await;
            deploy::destroy_site(&provisioner, &settings.context).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_site(dir: &Path) -> PathBuf {
        std::fs::create_dir_all(dir.join("dist")).unwrap();
        let path = dir.join(SITE_FILE_NAME);
        std::fs::write(&path, r#"
[site]
zone_name = "example.com"
sub_domain = "www"
web_asset_path = "dist"

[stack]
name = "file-stack"
account = "123456789012"
"#).unwrap();
        path
    }

    fn site_args(cli: &Cli) -> SiteArgs {
        match &cli.command {
            Command::Synth { site, .. } | Command::Deploy { site } | Command::Destroy { site } => site.clone(),
        }
    }

    #[test]
    fn site_file_is_found_in_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_site(dir.path());
        let nested = dir.path().join("a/b");
        std::fs::create_dir_all(&nested).unwrap();
        assert_eq!(find_closest_site_file(nested), Some(path));
    }

    #[test]
    fn flags_override_site_file() {
        let dir = tempfile::tempdir().unwrap();
        write_site(dir.path());
        let cli = Cli::parse_from(["hosted-site", "synth", "--zone-id", "Z1", "--stack-name", "flag-stack"]);
        let settings = resolve_settings(&cli, &site_args(&cli), dir.path()).unwrap();
        assert_eq!(settings.context.stack_name, "flag-stack");
        assert_eq!(settings.context.region, "us-east-1");
        assert_eq!(settings.context.account.as_deref(), Some("123456789012"));
        assert_eq!(settings.props.sub_domain.as_deref(), Some("www"));
        assert_eq!(settings.props.web_asset_path, dir.path().join("dist"));
    }

    #[test]
    fn env_file_overrides_site_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = write_site(dir.path());
        let env = dir.path().join(".env");
        std::fs::write(&env, "SUB_DOMAIN=test\nSTACK_NAME=env-stack\n").unwrap();
        let cli = Cli::parse_from([
            "hosted-site", "deploy",
            "--config", config.to_str().unwrap(),
            "--env", env.to_str().unwrap(),
        ]);
        let settings = resolve_settings(&cli, &site_args(&cli), Path::new("/")).unwrap();
        assert_eq!(settings.props.sub_domain.as_deref(), Some("test"));
        assert_eq!(settings.context.stack_name, "env-stack");
    }

    #[test]
    fn missing_site_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let cli = Cli::parse_from(["hosted-site", "destroy"]);
        assert!(resolve_settings(&cli, &site_args(&cli), dir.path()).is_err());
    }
}
