//! AWS provider backend
//!
//! Implements [`InfraProvider`] on top of CloudFormation, EC2, and
//! Secrets Manager. Compiled only with the `aws` feature so the default
//! build carries no SDK weight.

use async_trait::async_trait;
use aws_sdk_cloudformation::error::DisplayErrorContext;
use aws_sdk_cloudformation::types::{Capability, Parameter as CfnParameter};
use aws_sdk_ec2::types::Filter;
use std::collections::BTreeMap;
use tracing::{debug, info};

use super::retry::{call_with_retry, RetryPolicy};
use super::types::{
    OperationHandle, OperationKind, OperationStatus, RawRoute, RawRouteTable, RawSubnet,
    RouteTarget, SecretMaterial, SecretReference, StackHealth, StackSnapshot,
    StandaloneDeployment, VpcNetwork,
};
use super::{InfraProvider, ProviderError};

/// Fallback template location for the standalone stack. Override with
/// `BENCHLINK_TEMPLATE_URL` when staging template changes.
const DEFAULT_TEMPLATE_URL: &str =
    "https://quilt-cloudformation.s3.amazonaws.com/benchling-webhook/latest.yaml";

/// Production provider backed by the AWS SDK.
pub struct AwsProvider {
    cloudformation: aws_sdk_cloudformation::Client,
    ec2: aws_sdk_ec2::Client,
    secrets: aws_sdk_secretsmanager::Client,
    retry: RetryPolicy,
}

impl AwsProvider {
    /// Create a provider from the ambient credential chain, optionally
    /// pinned to a region.
    pub async fn connect(region: Option<String>) -> Result<Self, ProviderError> {
        info!("Initializing AWS provider");

        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(aws_config::Region::new(region));
        }
        let config = loader.load().await;

        Ok(Self {
            cloudformation: aws_sdk_cloudformation::Client::new(&config),
            ec2: aws_sdk_ec2::Client::new(&config),
            secrets: aws_sdk_secretsmanager::Client::new(&config),
            retry: RetryPolicy::default(),
        })
    }

    async fn describe_stack_raw(
        &self,
        stack_name: &str,
    ) -> Result<Option<aws_sdk_cloudformation::types::Stack>, ProviderError> {
        match self
            .cloudformation
            .describe_stacks()
            .stack_name(stack_name)
            .send()
            .await
        {
            Ok(out) => Ok(out.stacks().first().cloned()),
            Err(err) => {
                let rendered = format!("{}", DisplayErrorContext(&err));
                // CloudFormation reports a missing stack as a generic
                // validation error, not a typed not-found.
                if rendered.contains("does not exist") {
                    Ok(None)
                } else {
                    Err(classify("describe_stacks", rendered))
                }
            }
        }
    }
}

#[async_trait]
impl InfraProvider for AwsProvider {
    async fn fetch_snapshot(
        &self,
        stack_name: &str,
    ) -> Result<Option<StackSnapshot>, ProviderError> {
        let stack = call_with_retry("describe_stacks", self.retry, || {
            self.describe_stack_raw(stack_name)
        })
        .await?;

        let Some(stack) = stack else {
            return Ok(None);
        };

        let raw_status = stack
            .stack_status()
            .map(|s| s.as_str().to_string())
            .unwrap_or_else(|| "UNKNOWN".to_string());

        let mut parameters = BTreeMap::new();
        for param in stack.parameters() {
            if let (Some(key), Some(value)) = (param.parameter_key(), param.parameter_value()) {
                parameters.insert(key.to_string(), value.to_string());
            }
        }

        let mut outputs = BTreeMap::new();
        for output in stack.outputs() {
            if let (Some(key), Some(value)) = (output.output_key(), output.output_value()) {
                outputs.insert(key.to_string(), value.to_string());
            }
        }

        let stack_id = stack.stack_id().unwrap_or_default().to_string();
        let (region, account) = arn_region_account(&stack_id);

        Ok(Some(StackSnapshot {
            stack_name: stack_name.to_string(),
            stack_id,
            region,
            account,
            health: StackHealth::from_raw(&raw_status),
            raw_status,
            parameters,
            outputs,
        }))
    }

    async fn describe_network(&self, vpc_id: &str) -> Result<VpcNetwork, ProviderError> {
        debug!("Describing network for {vpc_id}");
        let vpc_filter = Filter::builder().name("vpc-id").values(vpc_id).build();

        let vpcs = call_with_retry("describe_vpcs", self.retry, || async {
            self.ec2
                .describe_vpcs()
                .vpc_ids(vpc_id)
                .send()
                .await
                .map_err(|e| classify("describe_vpcs", format!("{}", DisplayErrorContext(&e))))
        })
        .await?;
        let cidr_block = vpcs
            .vpcs()
            .first()
            .and_then(|v| v.cidr_block())
            .map(String::from);

        let subnet_out = call_with_retry("describe_subnets", self.retry, || {
            let filter = vpc_filter.clone();
            async move {
                self.ec2
                    .describe_subnets()
                    .filters(filter)
                    .send()
                    .await
                    .map_err(|e| {
                        classify("describe_subnets", format!("{}", DisplayErrorContext(&e)))
                    })
            }
        })
        .await?;

        let subnets = subnet_out
            .subnets()
            .iter()
            .filter_map(|s| {
                Some(RawSubnet {
                    subnet_id: s.subnet_id()?.to_string(),
                    vpc_id: s.vpc_id()?.to_string(),
                    availability_zone: s.availability_zone()?.to_string(),
                    cidr_block: s.cidr_block().unwrap_or_default().to_string(),
                })
            })
            .collect();

        let table_out = call_with_retry("describe_route_tables", self.retry, || {
            let filter = vpc_filter.clone();
            async move {
                self.ec2
                    .describe_route_tables()
                    .filters(filter)
                    .send()
                    .await
                    .map_err(|e| {
                        classify("describe_route_tables", format!("{}", DisplayErrorContext(&e)))
                    })
            }
        })
        .await?;

        let route_tables = table_out
            .route_tables()
            .iter()
            .map(|table| {
                let routes = table
                    .routes()
                    .iter()
                    .filter_map(|route| {
                        let destination = route
                            .destination_cidr_block()
                            .or(route.destination_ipv6_cidr_block())?
                            .to_string();
                        let target = route
                            .gateway_id()
                            .or(route.nat_gateway_id())
                            .or(route.transit_gateway_id())
                            .or(route.vpc_peering_connection_id())
                            .or(route.network_interface_id())
                            .or(route.instance_id())
                            .map(RouteTarget::from_raw)?;
                        Some(RawRoute {
                            destination,
                            target,
                        })
                    })
                    .collect();

                let associated_subnet_ids = table
                    .associations()
                    .iter()
                    .filter_map(|a| a.subnet_id().map(String::from))
                    .collect();
                let is_main = table
                    .associations()
                    .iter()
                    .any(|a| a.main().unwrap_or(false));

                RawRouteTable {
                    route_table_id: table.route_table_id().unwrap_or_default().to_string(),
                    vpc_id: vpc_id.to_string(),
                    routes,
                    associated_subnet_ids,
                    is_main,
                }
            })
            .collect();

        Ok(VpcNetwork {
            vpc_id: vpc_id.to_string(),
            cidr_block,
            subnets,
            route_tables,
        })
    }

    async fn update_stack_parameter(
        &self,
        stack_name: &str,
        key: &str,
        value: &str,
    ) -> Result<OperationHandle, ProviderError> {
        // Carry every other parameter forward untouched.
        let snapshot = self
            .fetch_snapshot(stack_name)
            .await?
            .ok_or_else(|| ProviderError::stack_not_found(stack_name))?;

        let mut parameters = Vec::new();
        for existing in snapshot.parameters.keys() {
            let param = if existing == key {
                CfnParameter::builder()
                    .parameter_key(key)
                    .parameter_value(value)
                    .build()
            } else {
                CfnParameter::builder()
                    .parameter_key(existing)
                    .use_previous_value(true)
                    .build()
            };
            parameters.push(param);
        }
        if !snapshot.parameters.contains_key(key) {
            parameters.push(
                CfnParameter::builder()
                    .parameter_key(key)
                    .parameter_value(value)
                    .build(),
            );
        }

        info!("Updating {stack_name} parameter {key}");
        let out = self
            .cloudformation
            .update_stack()
            .stack_name(stack_name)
            .use_previous_template(true)
            .set_parameters(Some(parameters))
            .capabilities(Capability::CapabilityNamedIam)
            .send()
            .await
            .map_err(|e| classify("update_stack", format!("{}", DisplayErrorContext(&e))))?;

        Ok(OperationHandle {
            operation_id: out.stack_id().unwrap_or(stack_name).to_string(),
            kind: OperationKind::ParameterUpdate,
            stack_name: stack_name.to_string(),
        })
    }

    async fn deploy_standalone(
        &self,
        deployment: &StandaloneDeployment,
    ) -> Result<OperationHandle, ProviderError> {
        let template_url = std::env::var("BENCHLINK_TEMPLATE_URL")
            .unwrap_or_else(|_| DEFAULT_TEMPLATE_URL.to_string());
        let parameters: Vec<CfnParameter> = deployment
            .parameters
            .iter()
            .map(|(k, v)| {
                CfnParameter::builder()
                    .parameter_key(k)
                    .parameter_value(v)
                    .build()
            })
            .collect();

        let exists = self.describe_stack_raw(&deployment.stack_name).await?.is_some();
        let handle = OperationHandle {
            operation_id: deployment.stack_name.clone(),
            kind: OperationKind::StackDeploy,
            stack_name: deployment.stack_name.clone(),
        };

        if exists {
            info!("Updating standalone stack {}", deployment.stack_name);
            let result = self
                .cloudformation
                .update_stack()
                .stack_name(&deployment.stack_name)
                .template_url(&template_url)
                .set_parameters(Some(parameters))
                .capabilities(Capability::CapabilityNamedIam)
                .send()
                .await;
            if let Err(err) = result {
                let rendered = format!("{}", DisplayErrorContext(&err));
                // An update with nothing to change is already converged;
                // polling will observe the existing *_COMPLETE status.
                if !rendered.contains("No updates are to be performed") {
                    return Err(classify("update_stack", rendered));
                }
            }
        } else {
            info!("Creating standalone stack {}", deployment.stack_name);
            self.cloudformation
                .create_stack()
                .stack_name(&deployment.stack_name)
                .template_url(&template_url)
                .set_parameters(Some(parameters))
                .capabilities(Capability::CapabilityNamedIam)
                .send()
                .await
                .map_err(|e| classify("create_stack", format!("{}", DisplayErrorContext(&e))))?;
        }

        Ok(handle)
    }

    async fn poll_operation(
        &self,
        handle: &OperationHandle,
    ) -> Result<OperationStatus, ProviderError> {
        let stack = call_with_retry("describe_stacks", self.retry, || {
            self.describe_stack_raw(&handle.stack_name)
        })
        .await?
        .ok_or_else(|| ProviderError::UnknownOperation {
            operation_id: handle.operation_id.clone(),
        })?;

        let raw = stack
            .stack_status()
            .map(|s| s.as_str().to_string())
            .unwrap_or_else(|| "UNKNOWN".to_string());
        let reason = stack.stack_status_reason().unwrap_or("").to_string();
        Ok(status_from_raw(&raw, &reason))
    }

    async fn get_secret(
        &self,
        reference: &str,
    ) -> Result<Option<SecretReference>, ProviderError> {
        // Metadata probe only. The material itself is never fetched.
        match self
            .secrets
            .describe_secret()
            .secret_id(reference)
            .send()
            .await
        {
            Ok(out) => {
                // A secret shell with no stored versions counts as absent.
                let has_value = out
                    .version_ids_to_stages()
                    .is_some_and(|stages| !stages.is_empty());
                if has_value {
                    Ok(out.arn().map(SecretReference::new))
                } else {
                    Ok(None)
                }
            }
            Err(err) => {
                if err
                    .as_service_error()
                    .map(|e| e.is_resource_not_found_exception())
                    .unwrap_or(false)
                {
                    Ok(None)
                } else {
                    Err(classify(
                        "describe_secret",
                        format!("{}", DisplayErrorContext(&err)),
                    ))
                }
            }
        }
    }

    async fn put_secret(
        &self,
        reference_hint: &str,
        material: &SecretMaterial,
    ) -> Result<SecretReference, ProviderError> {
        match self
            .secrets
            .put_secret_value()
            .secret_id(reference_hint)
            .secret_string(material.expose())
            .send()
            .await
        {
            Ok(out) => Ok(SecretReference::new(out.arn().unwrap_or(reference_hint))),
            Err(err) => {
                let not_found = err
                    .as_service_error()
                    .map(|e| e.is_resource_not_found_exception())
                    .unwrap_or(false);
                if !not_found {
                    return Err(classify(
                        "put_secret_value",
                        format!("{}", DisplayErrorContext(&err)),
                    ));
                }
                let created = self
                    .secrets
                    .create_secret()
                    .name(reference_hint)
                    .secret_string(material.expose())
                    .send()
                    .await
                    .map_err(|e| {
                        classify("create_secret", format!("{}", DisplayErrorContext(&e)))
                    })?;
                Ok(SecretReference::new(created.arn().unwrap_or(reference_hint)))
            }
        }
    }
}

/// Pull region and account out of a stack ARN
/// (`arn:aws:cloudformation:REGION:ACCOUNT:stack/...`).
fn arn_region_account(arn: &str) -> (Option<String>, Option<String>) {
    let mut parts = arn.split(':');
    let region = parts.nth(3).filter(|s| !s.is_empty()).map(String::from);
    let account = parts.next().filter(|s| !s.is_empty()).map(String::from);
    (region, account)
}

/// Map a raw stack status to an operation status.
fn status_from_raw(raw: &str, reason: &str) -> OperationStatus {
    match StackHealth::from_raw(raw) {
        StackHealth::InProgress => OperationStatus::InProgress {
            detail: raw.to_string(),
        },
        StackHealth::Stable => OperationStatus::Succeeded,
        StackHealth::Failed => OperationStatus::Failed {
            reason: if reason.is_empty() {
                raw.to_string()
            } else {
                format!("{raw}: {reason}")
            },
        },
    }
}

/// Sort SDK failures into the retryable/terminal buckets the retry
/// wrapper understands.
fn classify(context: &str, rendered: String) -> ProviderError {
    let lower = rendered.to_lowercase();
    let message = format!("{context}: {rendered}");
    if lower.contains("throttling")
        || lower.contains("rate exceeded")
        || lower.contains("too many requests")
    {
        ProviderError::throttled(message)
    } else if lower.contains("accessdenied")
        || lower.contains("not authorized")
        || lower.contains("unauthorizedoperation")
    {
        ProviderError::access_denied(message)
    } else {
        let transient = lower.contains("timeout")
            || lower.contains("connection")
            || lower.contains("dispatch failure");
        ProviderError::api(message, transient)
    }
}
