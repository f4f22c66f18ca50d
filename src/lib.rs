//! A static site on AWS: an S3 bucket behind a CloudFront distribution with an
//! ACM certificate and a Route53 alias record, declared as a CloudFormation
//! template and deployed together with the site's assets.
//!
//! ```no_run
//! # async fn run() -> Result<(), hosted_site::DeployError> {
//! use hosted_site::{deploy::{aws::AwsProvisioner, deploy_site}, SiteProps, StackContext};
//!
//! let provisioner = AwsProvisioner::new("us-east-1").await;
//! let props = SiteProps::new("example.com", "./dist").sub_domain("www");
//! let outcome = deploy_site(&provisioner, StackContext::new("my-site", "us-east-1"), props).await?;
//! println!("https://{}", outcome.domain_name);
//! # Ok(())
//! # }
//! ```

pub mod assets;
pub mod deploy;
pub mod error;
pub mod parsing;
pub mod resources;
pub mod variables;

pub use error::{ConfigError, ConfigResult, DeployError, DeployResult};
pub use resources::{HostedSite, HostedZone, SiteProps, Stack, StackContext, Template};
