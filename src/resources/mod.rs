use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
pub use serde_json::{json, Value};

use crate::error::{ConfigError, ConfigResult};
use crate::parsing::{validate_account, validate_region, validate_stack_name};

mod lambda;
pub use lambda::*;
mod s3_bucket;
pub use s3_bucket::*;
mod certificate;
pub use certificate::*;
mod cloudfront;
pub use cloudfront::*;
mod route53;
pub use route53::*;

// higher level resources:
mod static_website;
pub use static_website::*;

pub const TEMPLATE_FORMAT_VERSION: &str = "2010-09-09";

/// a single resource that can be rendered into a cloudformation template.
pub trait CfnResource {
    fn type_string(&self) -> &'static str;
    fn properties(&self) -> Value;
    /// called once at synth time, before anything gets rendered.
    fn validate(&self) -> ConfigResult<()> {
        Ok(())
    }
}

pub fn get_ref(logical_id: &str) -> Value {
    json!({ "Ref": logical_id })
}

pub fn get_att(logical_id: &str, attribute: &str) -> Value {
    json!({ "Fn::GetAtt": [logical_id, attribute] })
}

pub fn sub(template: &str) -> Value {
    json!({ "Fn::Sub": template })
}

/// strips everything that is not ascii alphanumeric, cloudformation logical
/// ids only allow [A-Za-z0-9].
pub fn logical_id(scope_id: &str, name: &str) -> String {
    format!("{scope_id}{name}").chars().filter(|c| c.is_ascii_alphanumeric()).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeletionPolicy {
    Delete,
    Retain,
}

pub struct Resource {
    pub name: String,
    pub properties: Box<dyn CfnResource>,
    /// explicit ordering edges on top of the ones implied by Ref/GetAtt/Sub.
    pub depends_on: Vec<String>,
    /// also used as the UpdateReplacePolicy. None leaves the engine's default.
    pub deletion_policy: Option<DeletionPolicy>,
}

impl Resource {
    pub fn new<R: CfnResource + 'static>(name: impl Into<String>, properties: R) -> Self {
        Self {
            name: name.into(),
            properties: Box::new(properties) as _,
            depends_on: vec![],
            deletion_policy: None,
        }
    }
    pub fn depends_on(mut self, logical_id: impl Into<String>) -> Self {
        self.depends_on.push(logical_id.into());
        self
    }
    pub fn deletion_policy(mut self, policy: DeletionPolicy) -> Self {
        self.deletion_policy = Some(policy);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedResource {
    #[serde(rename = "Type")]
    pub ty: String,
    #[serde(rename = "Properties")]
    pub properties: Value,
    #[serde(rename = "DependsOn", default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    #[serde(rename = "DeletionPolicy", default, skip_serializing_if = "Option::is_none")]
    pub deletion_policy: Option<DeletionPolicy>,
    #[serde(rename = "UpdateReplacePolicy", default, skip_serializing_if = "Option::is_none")]
    pub update_replace_policy: Option<DeletionPolicy>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceOutput {
    #[serde(rename = "Description")]
    pub description: String,
    #[serde(rename = "Value")]
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    #[serde(rename = "AWSTemplateFormatVersion")]
    pub version: String,
    #[serde(rename = "Description", default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "Resources")]
    pub resources: BTreeMap<String, SavedResource>,
    #[serde(rename = "Outputs", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: BTreeMap<String, ResourceOutput>,
}

impl Default for Template {
    fn default() -> Self {
        Self {
            version: TEMPLATE_FORMAT_VERSION.to_string(),
            description: None,
            resources: Default::default(),
            outputs: Default::default(),
        }
    }
}

impl Template {
    pub fn to_json_pretty(&self) -> ConfigResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn resources_of_type<'a>(&'a self, ty: &'a str) -> impl Iterator<Item = (&'a String, &'a SavedResource)> + 'a {
        self.resources.iter().filter(move |(_, r)| r.ty == ty)
    }

    pub fn count_of_type(&self, ty: &str) -> usize {
        self.resources_of_type(ty).count()
    }
}

/// every logical id a value points at via Ref, Fn::GetAtt or Fn::Sub.
/// pseudo parameters like AWS::Region are ignored.
pub fn collect_references(value: &Value, out: &mut BTreeSet<String>) {
    match value {
        Value::Object(map) => {
            if let Some(Value::String(id)) = map.get("Ref") {
                if !id.starts_with("AWS::") {
                    out.insert(id.clone());
                }
            }
            if let Some(Value::Array(parts)) = map.get("Fn::GetAtt") {
                if let Some(Value::String(id)) = parts.first() {
                    out.insert(id.clone());
                }
            }
            if let Some(Value::String(s)) = map.get("Fn::Sub") {
                collect_sub_references(s, out);
            }
            for v in map.values() {
                collect_references(v, out);
            }
        }
        Value::Array(items) => {
            for v in items {
                collect_references(v, out);
            }
        }
        _ => {}
    }
}

fn collect_sub_references(s: &str, out: &mut BTreeSet<String>) {
    let mut rest = s;
    while let Some(start) = rest.find("${") {
        rest = &rest[start + 2..];
        let end = match rest.find('}') {
            Some(e) => e,
            None => return,
        };
        let var = &rest[..end];
        // ${!Literal} is an escape, not a reference
        if !var.starts_with('!') && !var.starts_with("AWS::") {
            let id = var.split('.').next().unwrap_or(var);
            out.insert(id.to_string());
        }
        rest = &rest[end + 1..];
    }
}

/// The deployment scope a construct is declared in. Passed explicitly, never
/// looked up from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackContext {
    pub stack_name: String,
    pub region: String,
    /// when unknown, templates refer to the deploying account via AWS::AccountId.
    pub account: Option<String>,
}

impl StackContext {
    pub fn new(stack_name: impl Into<String>, region: impl Into<String>) -> Self {
        Self { stack_name: stack_name.into(), region: region.into(), account: None }
    }

    pub fn with_account(mut self, account: impl Into<String>) -> Self {
        self.account = Some(account.into());
        self
    }

    pub fn validate(&self) -> ConfigResult<()> {
        validate_stack_name(&self.stack_name)?;
        validate_region(&self.region)?;
        if let Some(account) = &self.account {
            validate_account(account)?;
        }
        Ok(())
    }

    pub fn account_value(&self) -> Value {
        match &self.account {
            Some(a) => Value::String(a.clone()),
            None => get_ref("AWS::AccountId"),
        }
    }
}

pub struct Stack {
    pub context: StackContext,
    pub description: Option<String>,
    resources: Vec<Resource>,
    outputs: BTreeMap<String, ResourceOutput>,
}

impl Stack {
    pub fn new(context: StackContext) -> Self {
        Self { context, description: None, resources: vec![], outputs: Default::default() }
    }

    pub fn add_resource(&mut self, resource: Resource) -> ConfigResult<()> {
        let name = &resource.name;
        if name.is_empty() || name.len() > 255 || !name.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(ConfigError::InvalidStackContext(format!(
                "Invalid resource name {name:?}\nMust be 1 to 255 alphanumeric characters [A-Za-z0-9]"
            )));
        }
        if self.resources.iter().any(|r| &r.name == name) {
            return Err(ConfigError::DuplicateResource(name.clone()));
        }
        self.resources.push(resource);
        Ok(())
    }

    pub fn add_output(&mut self, name: &str, description: &str, value: Value) {
        self.outputs.insert(name.to_string(), ResourceOutput {
            description: description.to_string(),
            value,
        });
    }

    pub fn resource_names(&self) -> impl Iterator<Item = &str> {
        self.resources.iter().map(|r| r.name.as_str())
    }

    fn dependencies_of(&self, resource: &Resource) -> BTreeSet<String> {
        let mut refs = BTreeSet::new();
        collect_references(&resource.properties.properties(), &mut refs);
        refs.extend(resource.depends_on.iter().cloned());
        refs.remove(&resource.name);
        refs
    }

    /// The order the engine has to create resources in: every resource comes
    /// after everything it references. Ties keep declaration order.
    pub fn creation_order(&self) -> ConfigResult<Vec<String>> {
        let known: BTreeSet<&str> = self.resource_names().collect();
        let deps: Vec<BTreeSet<String>> = self.resources.iter()
            .map(|r| {
                self.dependencies_of(r).into_iter().filter(|d| known.contains(d.as_str())).collect()
            })
            .collect();
        let mut placed: BTreeSet<String> = BTreeSet::new();
        let mut order = Vec::with_capacity(self.resources.len());
        while order.len() < self.resources.len() {
            let next = self.resources.iter().enumerate().find(|(i, r)| {
                !placed.contains(&r.name) && deps[*i].iter().all(|d| placed.contains(d))
            });
            match next {
                Some((_, r)) => {
                    placed.insert(r.name.clone());
                    order.push(r.name.clone());
                }
                None => {
                    let stuck = self.resources.iter()
                        .find(|r| !placed.contains(&r.name))
                        .map(|r| r.name.clone())
                        .unwrap_or_default();
                    return Err(ConfigError::DependencyCycle(stuck));
                }
            }
        }
        Ok(order)
    }

    pub fn synth(&self) -> ConfigResult<Template> {
        self.context.validate()?;
        let known: BTreeSet<&str> = self.resource_names().collect();
        let mut out = Template {
            description: self.description.clone(),
            ..Default::default()
        };
        for resource in self.resources.iter() {
            resource.properties.validate()?;
            for dep in resource.depends_on.iter() {
                if !known.contains(dep.as_str()) {
                    return Err(ConfigError::InvalidStackContext(format!(
                        "Resource '{}' depends on unknown resource '{dep}'", resource.name
                    )));
                }
            }
            out.resources.insert(resource.name.clone(), SavedResource {
                ty: resource.properties.type_string().to_string(),
                properties: resource.properties.properties(),
                depends_on: resource.depends_on.clone(),
                deletion_policy: resource.deletion_policy,
                update_replace_policy: resource.deletion_policy,
            });
        }
        self.creation_order()?;
        out.outputs = self.outputs.clone();
        Ok(out)
    }
}
