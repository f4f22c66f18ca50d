use std::collections::HashMap;

use async_trait::async_trait;
use aws_sdk_cloudformation::types::{Capability, OnFailure, Stack, StackStatus};
use aws_sdk_cloudfront::types::{InvalidationBatch, Paths};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{Delete, ObjectIdentifier};
use tracing::{debug, info};

use super::Provisioner;
use crate::assets::AssetFile;
use crate::error::{DeployError, DeployResult};
use crate::parsing::normalize_domain;
use crate::resources::HostedZone;

/// DeleteObjects accepts at most this many keys per request.
const DELETE_BATCH_SIZE: usize = 1000;

const POLL_INTERVAL_MS: u64 = 700;

pub struct AwsProvisioner {
    cloudformation: aws_sdk_cloudformation::Client,
    s3: aws_sdk_s3::Client,
    cloudfront: aws_sdk_cloudfront::Client,
    route53: aws_sdk_route53::Client,
}

impl AwsProvisioner {
    /// credentials come from the usual environment/profile chain.
    pub async fn new(region: &str) -> Self {
        let shared_config = aws_config::from_env()
            .region(aws_sdk_cloudformation::config::Region::new(region.to_string()))
            .load()
            .await;
        Self {
            cloudformation: aws_sdk_cloudformation::Client::new(&shared_config),
            s3: aws_sdk_s3::Client::new(&shared_config),
            cloudfront: aws_sdk_cloudfront::Client::new(&shared_config),
            route53: aws_sdk_route53::Client::new(&shared_config),
        }
    }
}

enum StackState {
    Settled(Stack),
    InProgress,
}

/// what the caller is waiting for. a stack that ends up deleted is only
/// a success when we asked for it to be deleted.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Waiting {
    Deploy,
    Destroy,
}

#[derive(Debug, PartialEq)]
enum Progress {
    Done,
    InProgress,
    Failed,
}

fn classify_status(status: &StackStatus, waiting: Waiting) -> Progress {
    match status {
        StackStatus::DeleteComplete => match waiting {
            Waiting::Destroy => Progress::Done,
            // create with OnFailure::Delete ends here
            Waiting::Deploy => Progress::Failed,
        },
        StackStatus::CreateComplete |
        StackStatus::UpdateComplete |
        StackStatus::ImportComplete => Progress::Done,

        StackStatus::CreateInProgress |
        StackStatus::DeleteInProgress |
        StackStatus::ImportInProgress |
        StackStatus::ImportRollbackInProgress |
        StackStatus::ReviewInProgress |
        StackStatus::RollbackInProgress |
        StackStatus::UpdateCompleteCleanupInProgress |
        StackStatus::UpdateInProgress |
        StackStatus::UpdateRollbackCompleteCleanupInProgress |
        StackStatus::UpdateRollbackInProgress => Progress::InProgress,

        // an update that rolled back leaves a working stack behind, but not the one we asked for
        _ => Progress::Failed,
    }
}

pub async fn does_stack_exist(client: &aws_sdk_cloudformation::Client, name: &str) -> DeployResult<bool> {
    match client.describe_stacks().stack_name(name).send().await {
        Ok(_) => Ok(true),
        Err(e) => {
            let e_str = format!("{:#?}", e);
            if e_str.contains("does not exist") {
                return Ok(false);
            }
            Err(DeployError::Aws { operation: "DescribeStacks", message: e_str })
        }
    }
}

/// the oldest failed resource event, which is usually the one that
/// started the rollback.
async fn first_failure_reason(client: &aws_sdk_cloudformation::Client, stack_id: &str) -> Option<String> {
    let resp = client.describe_stack_events().stack_name(stack_id).send().await.ok()?;
    resp.stack_events()
        .unwrap_or_default()
        .iter()
        .rev()
        .find(|event| event.resource_status().map(|s| s.as_str().ends_with("_FAILED")).unwrap_or(false))
        .map(|event| format!(
            "{}: {}",
            event.logical_resource_id().unwrap_or_default(),
            event.resource_status_reason().unwrap_or_default(),
        ))
}

/// `stack_id` may be the stack's name, but a stack that was deleted can only be
/// described by its id.
async fn describe_stack(client: &aws_sdk_cloudformation::Client, stack_id: &str, waiting: Waiting) -> DeployResult<StackState> {
    let not_found = || DeployError::StackFailed {
        stack: stack_id.to_string(),
        reason: "stack not found".into(),
    };
    let resp = client.describe_stacks().stack_name(stack_id).send().await
        .map_err(|e| DeployError::aws("DescribeStacks", e))?;
    let first = resp.stacks().and_then(|s| s.first()).ok_or_else(not_found)?;
    let status = first.stack_status().ok_or_else(not_found)?;
    match classify_status(status, waiting) {
        Progress::Done => Ok(StackState::Settled(first.clone())),
        Progress::InProgress => Ok(StackState::InProgress),
        Progress::Failed => {
            let reason = match first.stack_status_reason() {
                Some(reason) if !reason.is_empty() => reason.to_string(),
                _ => first_failure_reason(client, stack_id).await
                    .unwrap_or_else(|| "Failed to get stack failure reason".into()),
            };
            Err(DeployError::StackFailed {
                stack: first.stack_name().unwrap_or(stack_id).to_string(),
                reason: format!("{}: {}", status.as_str(), reason),
            })
        }
    }
}

pub async fn wait_for_output(client: &aws_sdk_cloudformation::Client, stack_id: &str) -> DeployResult<HashMap<String, String>> {
    loop {
        let dur = tokio::time::Duration::from_millis(POLL_INTERVAL_MS);
        tokio::time::sleep(dur).await;
        match describe_stack(client, stack_id, Waiting::Deploy).await? {
            StackState::Settled(stack) => {
                let mut out = HashMap::new();
                for output in stack.outputs().unwrap_or_default() {
                    if let (Some(key), Some(val)) = (output.output_key(), output.output_value()) {
                        out.insert(key.to_string(), val.to_string());
                    }
                }
                return Ok(out);
            }
            StackState::InProgress => {
                debug!(stack = stack_id, "still waiting");
            }
        }
    }
}

/// returns the id to poll. when there was nothing to update that is
/// the stack name, which still resolves because the stack exists.
pub async fn create_or_update_stack(client: &aws_sdk_cloudformation::Client, name: &str, body: &str) -> DeployResult<String> {
    let exists = does_stack_exist(client, name).await?;
    if exists {
        info!(stack = name, "updating stack");
        let res = client
            .update_stack()
            .capabilities(Capability::CapabilityNamedIam)
            .capabilities(Capability::CapabilityIam)
            .stack_name(name)
            .template_body(body)
            .send()
            .await;
        match res {
            Ok(out) => Ok(out.stack_id().unwrap_or(name).to_string()),
            Err(e) => {
                let e_str = format!("{:#?}", e);
                if e_str.contains("No updates are to be performed") {
                    info!(stack = name, "stack is already up to date");
                    return Ok(name.to_string());
                }
                Err(DeployError::Aws { operation: "UpdateStack", message: e_str })
            }
        }
    } else {
        info!(stack = name, "creating stack");
        let out = client
            .create_stack()
            .on_failure(OnFailure::Delete)
            .capabilities(Capability::CapabilityNamedIam)
            .capabilities(Capability::CapabilityIam)
            .stack_name(name)
            .template_body(body)
            .send()
            .await
            .map_err(|e| DeployError::aws("CreateStack", e))?;
        Ok(out.stack_id().unwrap_or(name).to_string())
    }
}

#[async_trait]
impl Provisioner for AwsProvisioner {
    async fn lookup_zone(&self, zone_name: &str) -> DeployResult<HostedZone> {
        let wanted = normalize_domain(zone_name);
        let resp = self.route53
            .list_hosted_zones_by_name()
            .dns_name(&wanted)
            .send()
            .await
            .map_err(|e| DeployError::aws("ListHostedZonesByName", e))?;
        // results start at dns_name and continue alphabetically, so only an exact match counts
        let zone = resp.hosted_zones().unwrap_or_default().iter().find(|z| {
            let public = z.config().map(|c| !c.private_zone()).unwrap_or(true);
            public && z.name().map(normalize_domain).as_deref() == Some(wanted.as_str())
        });
        match zone {
            Some(z) => Ok(HostedZone::new(z.id().unwrap_or_default(), z.name().unwrap_or_default())),
            None => Err(DeployError::ZoneNotFound(wanted)),
        }
    }

    async fn deploy_stack(&self, stack_name: &str, template_body: &str) -> DeployResult<HashMap<String, String>> {
        let stack_id = create_or_update_stack(&self.cloudformation, stack_name, template_body).await?;
        debug!(stack = stack_name, stack_id = %stack_id, "waiting for stack");
        let outputs = wait_for_output(&self.cloudformation, &stack_id).await?;
        info!(stack = stack_name, outputs = outputs.len(), "stack is ready");
        Ok(outputs)
    }

    async fn destroy_stack(&self, stack_name: &str) -> DeployResult<()> {
        if !does_stack_exist(&self.cloudformation, stack_name).await? {
            info!(stack = stack_name, "stack does not exist, nothing to destroy");
            return Ok(());
        }
        let resp = self.cloudformation.describe_stacks().stack_name(stack_name).send().await
            .map_err(|e| DeployError::aws("DescribeStacks", e))?;
        let stack_id = resp.stacks()
            .and_then(|s| s.first())
            .and_then(|s| s.stack_id())
            .unwrap_or(stack_name)
            .to_string();
        self.cloudformation
            .delete_stack()
            .stack_name(stack_name)
            .send()
            .await
            .map_err(|e| DeployError::aws("DeleteStack", e))?;
        loop {
            tokio::time::sleep(tokio::time::Duration::from_millis(POLL_INTERVAL_MS)).await;
            match describe_stack(&self.cloudformation, &stack_id, Waiting::Destroy).await? {
                StackState::Settled(stack) if stack.stack_status() == Some(&StackStatus::DeleteComplete) => {
                    return Ok(());
                }
                _ => debug!(stack = stack_name, "still deleting"),
            }
        }
    }

    async fn put_object(&self, bucket: &str, file: &AssetFile) -> DeployResult<()> {
        let body = tokio::fs::read(&file.path).await.map_err(|source| DeployError::Io {
            path: file.path.clone(),
            source,
        })?;
        self.s3
            .put_object()
            .bucket(bucket)
            .key(&file.key)
            .content_type(file.content_type)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| DeployError::aws("PutObject", e))?;
        Ok(())
    }

    async fn list_objects(&self, bucket: &str) -> DeployResult<Vec<String>> {
        let mut keys = vec![];
        let mut token: Option<String> = None;
        loop {
            let resp = self.s3
                .list_objects_v2()
                .bucket(bucket)
                .set_continuation_token(token.take())
                .send()
                .await
                .map_err(|e| DeployError::aws("ListObjectsV2", e))?;
            for object in resp.contents().unwrap_or_default() {
                if let Some(key) = object.key() {
                    keys.push(key.to_string());
                }
            }
            match resp.next_continuation_token() {
                Some(next) => token = Some(next.to_string()),
                None => return Ok(keys),
            }
        }
    }

    async fn delete_objects(&self, bucket: &str, keys: &[String]) -> DeployResult<()> {
        for chunk in keys.chunks(DELETE_BATCH_SIZE) {
            let objects = chunk.iter()
                .map(|key| ObjectIdentifier::builder().key(key).build())
                .collect();
            let delete = Delete::builder().set_objects(Some(objects)).quiet(true).build();
            self.s3
                .delete_objects()
                .bucket(bucket)
                .delete(delete)
                .send()
                .await
                .map_err(|e| DeployError::aws("DeleteObjects", e))?;
        }
        Ok(())
    }

    async fn create_invalidation(&self, distribution_id: &str, paths: &[String], caller_reference: &str) -> DeployResult<String> {
        let paths = Paths::builder()
            .quantity(paths.len() as i32)
            .set_items(Some(paths.to_vec()))
            .build();
        let batch = InvalidationBatch::builder()
            .paths(paths)
            .caller_reference(caller_reference)
            .build();
        let resp = self.cloudfront
            .create_invalidation()
            .distribution_id(distribution_id)
            .invalidation_batch(batch)
            .send()
            .await
            .map_err(|e| DeployError::aws("CreateInvalidation", e))?;
        Ok(resp.invalidation().and_then(|i| i.id()).unwrap_or_default().to_string())
    }
}
