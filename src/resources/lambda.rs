use super::*;

pub const POLICY_VERSION: &str = "2012-10-17";
pub const BASIC_EXECUTION_ROLE_ARN: &str = "arn:aws:iam::aws:policy/service-role/AWSLambdaBasicExecutionRole";
pub const CUSTOM_RESOURCE_RUNTIME: &str = "nodejs18.x";

#[derive(Debug, Clone, PartialEq)]
pub struct PolicyStatement {
    pub effect: String,
    pub actions: Vec<String>,
    pub resources: Vec<Value>,
    pub principal: Option<Value>,
    pub condition: Option<Value>,
}

impl PolicyStatement {
    pub fn allow<S: AsRef<str>>(actions: &[S], resources: Vec<Value>) -> Self {
        Self {
            effect: "Allow".to_string(),
            actions: actions.iter().map(|a| a.as_ref().to_string()).collect(),
            resources,
            principal: None,
            condition: None,
        }
    }
    pub fn principal(mut self, principal: Value) -> Self {
        self.principal = Some(principal);
        self
    }
    pub fn condition(mut self, condition: Value) -> Self {
        self.condition = Some(condition);
        self
    }
    pub fn to_value(&self) -> Value {
        let mut map = serde_json::Map::new();
        map.insert("Effect".to_string(), Value::String(self.effect.clone()));
        if let Some(p) = &self.principal {
            map.insert("Principal".to_string(), p.clone());
        }
        let actions: Vec<Value> = self.actions.iter().cloned().map(Value::String).collect();
        map.insert("Action".to_string(), single_or_list(actions));
        if !self.resources.is_empty() {
            map.insert("Resource".to_string(), single_or_list(self.resources.clone()));
        }
        if let Some(c) = &self.condition {
            map.insert("Condition".to_string(), c.clone());
        }
        Value::Object(map)
    }
}

fn single_or_list(mut values: Vec<Value>) -> Value {
    if values.len() == 1 {
        values.remove(0)
    } else {
        Value::Array(values)
    }
}

pub fn policy_document(statements: &[PolicyStatement]) -> Value {
    json!({
        "Version": POLICY_VERSION,
        "Statement": statements.iter().map(|s| s.to_value()).collect::<Vec<_>>(),
    })
}

pub fn create_assume_role_policy_doc() -> Value {
    policy_document(&[
        PolicyStatement::allow(&["sts:AssumeRole"], vec![])
            .principal(json!({ "Service": "lambda.amazonaws.com" })),
    ])
}

/// execution role for the functions backing custom resources.
pub struct IamRole {
    pub description: String,
    pub statements: Vec<PolicyStatement>,
}

impl CfnResource for IamRole {
    fn type_string(&self) -> &'static str {
        "AWS::IAM::Role"
    }
    fn properties(&self) -> Value {
        json!({
            "Description": self.description,
            "AssumeRolePolicyDocument": create_assume_role_policy_doc(),
            "ManagedPolicyArns": [BASIC_EXECUTION_ROLE_ARN],
            "Policies": [{
                "PolicyName": "inline",
                "PolicyDocument": policy_document(&self.statements),
            }],
        })
    }
}

/// a lambda function whose code is small enough to live in the template.
pub struct InlineFunction {
    pub description: String,
    pub role_logical_id: String,
    pub code: &'static str,
    pub timeout_seconds: u32,
}

impl CfnResource for InlineFunction {
    fn type_string(&self) -> &'static str {
        "AWS::Lambda::Function"
    }
    fn properties(&self) -> Value {
        json!({
            "Description": self.description,
            "Runtime": CUSTOM_RESOURCE_RUNTIME,
            "Handler": "index.handler",
            "Timeout": self.timeout_seconds,
            "MemorySize": 128,
            "Role": get_att(&self.role_logical_id, "Arn"),
            "Code": { "ZipFile": self.code },
        })
    }
    fn validate(&self) -> ConfigResult<()> {
        // cloudformation rejects ZipFile bodies over 4096 bytes
        if self.code.len() > 4096 {
            return Err(ConfigError::InvalidStackContext(format!(
                "inline function '{}' is {} bytes, the limit is 4096", self.description, self.code.len()
            )));
        }
        Ok(())
    }
}

/// a `Custom::` resource that is handled by one of our inline functions.
pub struct CustomResource {
    pub type_name: &'static str,
    pub function_logical_id: String,
    pub properties: serde_json::Map<String, Value>,
}

impl CfnResource for CustomResource {
    fn type_string(&self) -> &'static str {
        self.type_name
    }
    fn properties(&self) -> Value {
        let mut map = self.properties.clone();
        map.insert("ServiceToken".to_string(), get_att(&self.function_logical_id, "Arn"));
        Value::Object(map)
    }
}

/// logical ids of the three resources that make up a custom resource.
pub struct CustomResourceIds {
    pub role: String,
    pub function: String,
    pub resource: String,
}

/// declares role + function + custom resource. Returns the logical ids
/// so callers can hang further dependencies off of them.
pub fn add_custom_resource(
    stack: &mut Stack,
    base_id: &str,
    type_name: &'static str,
    description: &str,
    code: &'static str,
    statements: Vec<PolicyStatement>,
    properties: serde_json::Map<String, Value>,
) -> ConfigResult<CustomResourceIds> {
    let ids = CustomResourceIds {
        role: format!("{base_id}Role"),
        function: format!("{base_id}Function"),
        resource: base_id.to_string(),
    };
    stack.add_resource(Resource::new(&ids.role, IamRole {
        description: format!("execution role for {description}"),
        statements,
    }))?;
    stack.add_resource(Resource::new(&ids.function, InlineFunction {
        description: description.to_string(),
        role_logical_id: ids.role.clone(),
        code,
        timeout_seconds: 300,
    }))?;
    stack.add_resource(Resource::new(&ids.resource, CustomResource {
        type_name,
        function_logical_id: ids.function.clone(),
        properties,
    }))?;
    Ok(ids)
}
