use super::*;

/// removes a record of the same name and type that was created outside of
/// this stack, so the alias record can take its place.
pub const DELETE_EXISTING_RECORD_CODE: &str = r#"const { Route53Client, ListResourceRecordSetsCommand, ChangeResourceRecordSetsCommand, waitUntilResourceRecordSetsChanged } = require('@aws-sdk/client-route-53');
const response = require('cfn-response');
const route53 = new Route53Client({});
// route53 lists names with octal escapes, a wildcard comes back as \052
const unescapeName = name => name.replace(/\\([0-7]{3})/g, (_, oct) => String.fromCharCode(parseInt(oct, 8)));
async function deleteExisting(props) {
    const page = await route53.send(new ListResourceRecordSetsCommand({
        HostedZoneId: props.HostedZoneId,
        StartRecordName: props.RecordName,
        StartRecordType: props.RecordType,
        MaxItems: '1',
    }));
    const existing = (page.ResourceRecordSets || [])[0];
    if (!existing || unescapeName(existing.Name) !== props.RecordName || existing.Type !== props.RecordType) {
        return;
    }
    const change = await route53.send(new ChangeResourceRecordSetsCommand({
        HostedZoneId: props.HostedZoneId,
        ChangeBatch: { Changes: [{ Action: 'DELETE', ResourceRecordSet: existing }] },
    }));
    await waitUntilResourceRecordSetsChanged({ client: route53, maxWaitTime: 600 }, { Id: change.ChangeInfo.Id });
}
exports.handler = async function(event, context) {
    let status = response.SUCCESS;
    if (event.RequestType === 'Create') {
        try {
            await deleteExisting(event.ResourceProperties);
        } catch (err) {
            console.log(`Error deleting existing record: ${err}`);
            status = response.FAILED;
        }
    }
    await new Promise(resolve => {
        context.done = resolve;
        response.send(event, context, status, {}, event.PhysicalResourceId || event.LogicalResourceId);
    });
};
"#;

pub const DELETE_EXISTING_RESOURCE_TYPE: &str = "Custom::DeleteExistingRecordSet";

/// short, so a redeploy that points the name somewhere else cuts over quickly.
pub const DEFAULT_RECORD_TTL_SECONDS: u32 = 30;

const VALID_RECORD_TYPES: &[&str] = &["A", "AAAA", "CNAME", "TXT", "MX", "NS", "SRV", "CAA"];

#[derive(Debug, Clone, PartialEq)]
pub struct AliasTarget {
    pub dns_name: Value,
    pub hosted_zone_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Route53RecordSet {
    pub record_type: String,
    /// fully qualified, without the trailing dot.
    pub name: String,
    pub hosted_zone_id: String,
    pub alias_target: Option<AliasTarget>,
    pub ttl_seconds: u32,
    /// replace a record of the same name and type that already exists in the zone.
    pub delete_existing: bool,
}

impl Route53RecordSet {
    pub fn alias_a_record(name: &str, hosted_zone_id: &str, target: AliasTarget) -> Self {
        Self {
            record_type: "A".into(),
            name: name.to_string(),
            hosted_zone_id: hosted_zone_id.to_string(),
            alias_target: Some(target),
            ttl_seconds: DEFAULT_RECORD_TTL_SECONDS,
            delete_existing: true,
        }
    }

    /// the name as route53 stores it.
    pub fn record_name(&self) -> String {
        format!("{}.", self.name)
    }
}

impl CfnResource for Route53RecordSet {
    fn type_string(&self) -> &'static str {
        "AWS::Route53::RecordSet"
    }
    fn properties(&self) -> Value {
        let mut props = serde_json::Map::new();
        props.insert("Name".into(), Value::String(self.record_name()));
        props.insert("Type".into(), Value::String(self.record_type.clone()));
        props.insert("HostedZoneId".into(), Value::String(self.hosted_zone_id.clone()));
        props.insert("Comment".into(), Value::String(self.name.clone()));
        match &self.alias_target {
            Some(target) => {
                props.insert("AliasTarget".into(), json!({
                    "DNSName": target.dns_name,
                    "HostedZoneId": target.hosted_zone_id,
                    "EvaluateTargetHealth": false,
                }));
            }
            // cloudformation rejects TTL on alias records, the alias inherits the target's
            None => {
                props.insert("TTL".into(), Value::String(self.ttl_seconds.to_string()));
            }
        }
        Value::Object(props)
    }
    fn validate(&self) -> ConfigResult<()> {
        if self.name.is_empty() || self.name.ends_with('.') {
            return Err(ConfigError::InvalidDomainConfig(format!(
                "Route53 record must have a name without a trailing dot. Example mysubdomain.mywebsite.com, found {:?}",
                self.name
            )));
        }
        if !VALID_RECORD_TYPES.contains(&self.record_type.as_str()) {
            return Err(ConfigError::InvalidDomainConfig(format!(
                "Unsupported record type {:?}", self.record_type
            )));
        }
        if self.hosted_zone_id.is_empty() {
            return Err(ConfigError::InvalidDomainConfig("Route53 record must have a hosted zone id".into()));
        }
        Ok(())
    }
}

/// declares the record, plus the delete-existing custom resource the record
/// waits on when `delete_existing` is set.
pub fn add_record(stack: &mut Stack, logical_id: &str, record: Route53RecordSet) -> ConfigResult<()> {
    let mut resource = Resource::new(logical_id, record.clone());
    if record.delete_existing {
        let mut props = serde_json::Map::new();
        props.insert("HostedZoneId".into(), Value::String(record.hosted_zone_id.clone()));
        props.insert("RecordName".into(), Value::String(record.record_name()));
        props.insert("RecordType".into(), Value::String(record.record_type.clone()));
        let ids = add_custom_resource(
            stack,
            &format!("{logical_id}DeleteExisting"),
            DELETE_EXISTING_RESOURCE_TYPE,
            &format!("deletes a pre-existing {} record for {}", record.record_type, record.name),
            DELETE_EXISTING_RECORD_CODE,
            vec![
                PolicyStatement::allow(
                    &["route53:ListResourceRecordSets", "route53:ChangeResourceRecordSets"],
                    vec![Value::String(format!("arn:aws:route53:::hostedzone/{}", record.hosted_zone_id))],
                ),
                PolicyStatement::allow(&["route53:GetChange"], vec![json!("*")]),
            ],
            props,
        )?;
        resource = resource.depends_on(ids.resource);
    }
    stack.add_resource(resource)
}
