//! Cluster, task definition, service and scaling.
//!
//! ```text
//! provision ──▶ cluster, log group, execution role, task definition
//! add_targets / deploy ──▶ service (with load balancer binding)
//! attach_scaling ──▶ scalable target, step policies, CPU alarms
//! ```

use std::collections::BTreeMap;

use serde_json::{Value, json};
use tracing::{debug, info};

use tierstack_autoscale::ScalingPolicy;
use tierstack_core::template::{ResourceDecl, attribute, join, reference};
use tierstack_core::{ComposeError, ComposeResult, LogicalId, SubnetKind, Template};
use tierstack_edge::{LoadBalancerTarget, TargetBinding};
use tierstack_network::{AccessPolicy, SubnetSelection};

use crate::image::ImageRef;
use crate::injection::SecretInjection;
use crate::shape::TaskShape;

const RESOURCE: &str = "EcsService";

/// Retention periods the log service accepts, in days.
const RETENTION_DAYS: [u32; 22] = [
    1, 3, 5, 7, 14, 30, 60, 90, 120, 150, 180, 365, 400, 545, 731, 1096, 1827, 2192, 2557, 2922,
    3288, 3653,
];

/// Seconds new tasks get before load balancer health checks count.
const HEALTH_CHECK_GRACE_SECS: u32 = 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    pub stream_prefix: String,
    pub retention_days: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceOptions {
    /// Region the log driver delivers to.
    pub region: String,
    pub container_port: u16,
    pub desired_count: u32,
    pub logging: Option<LogSettings>,
    /// Plain (non-secret) container variables.
    pub environment: BTreeMap<String, String>,
}

/// Resources declared by [`ComputeService::attach_scaling`].
#[derive(Debug, Clone, PartialEq)]
pub struct ScalingAttachment {
    pub target: LogicalId,
    pub scale_out: LogicalId,
    pub scale_in: LogicalId,
    pub alarms: [LogicalId; 2],
    pub policy: ScalingPolicy,
}

/// Handle to the compute tier.
#[derive(Debug, Clone)]
pub struct ComputeService {
    name: String,
    cluster: LogicalId,
    task_definition: LogicalId,
    container_name: String,
    container_port: u16,
    desired_count: u32,
    subnets: Value,
    security_group: Value,
    service: Option<LogicalId>,
    scaling: Option<ScalingAttachment>,
}

impl ComputeService {
    /// Declare the cluster, log group, execution role and task definition.
    ///
    /// The database connection must come from a secret source; without one
    /// the service is not provisioned.
    #[allow(clippy::too_many_arguments)]
    pub fn provision(
        template: &mut Template,
        resource_name: &str,
        subnets: &SubnetSelection,
        policy: &AccessPolicy,
        image: &ImageRef,
        shape: &TaskShape,
        injection: Option<&SecretInjection>,
        options: &ServiceOptions,
    ) -> ComposeResult<Self> {
        let injection = injection.ok_or_else(|| {
            ComposeError::resource(RESOURCE, "no secret source supplied for the database connection")
        })?;
        if subnets.kind == SubnetKind::Public {
            return Err(ComposeError::configuration(
                RESOURCE,
                "subnets",
                format!("{} is a public group; tasks run in private subnets", subnets.group),
            ));
        }
        if options.container_port == 0 {
            return Err(ComposeError::configuration(RESOURCE, "container_port", "port 0 is not valid"));
        }
        if let Some(logging) = &options.logging {
            if !RETENTION_DAYS.contains(&logging.retention_days) {
                return Err(ComposeError::configuration(
                    RESOURCE,
                    "logging.retention_days",
                    format!("{} is not a supported retention period", logging.retention_days),
                ));
            }
            if logging.stream_prefix.trim().is_empty() {
                return Err(ComposeError::configuration(
                    RESOURCE,
                    "logging.stream_prefix",
                    "must not be empty",
                ));
            }
        }

        let vars = injection.container_secrets();
        let mut environment: BTreeMap<&str, &str> = BTreeMap::new();
        for (name, value) in options
            .environment
            .iter()
            .chain(vars.environment.iter().map(|(n, v)| (n, v)))
        {
            if vars.secrets.iter().any(|(s, _)| s == name) || environment.insert(name, value).is_some() {
                return Err(ComposeError::configuration(
                    RESOURCE,
                    "env",
                    format!("{name} is defined more than once"),
                ));
            }
        }

        let cluster = template.add(
            ResourceDecl::new(&["Ecs", "Cluster"], "AWS::ECS::Cluster")
                .property("ClusterName", format!("{resource_name}-cluster")),
        )?;

        let log_group = match &options.logging {
            Some(logging) => Some(template.add(
                ResourceDecl::new(&["Ecs", "LogGroup"], "AWS::Logs::LogGroup")
                    .property("LogGroupName", format!("/ecs/{resource_name}"))
                    .property("RetentionInDays", logging.retention_days),
            )?),
            None => None,
        };

        let secret_resources = vars.policy_resources();
        let execution_role = template.add(
            ResourceDecl::new(&["Ecs", "TaskDefinition", "ExecutionRole"], "AWS::IAM::Role")
                .property(
                    "AssumeRolePolicyDocument",
                    json!({
                        "Version": "2012-10-17",
                        "Statement": [{
                            "Effect": "Allow",
                            "Principal": { "Service": "ecs-tasks.amazonaws.com" },
                            "Action": "sts:AssumeRole",
                        }],
                    }),
                )
                .property(
                    "ManagedPolicyArns",
                    json!([{
                        "Fn::Sub": "arn:${AWS::Partition}:iam::aws:policy/service-role/AmazonECSTaskExecutionRolePolicy"
                    }]),
                )
                .property(
                    "Policies",
                    json!([{
                        "PolicyName": "read-database-secrets",
                        "PolicyDocument": {
                            "Version": "2012-10-17",
                            "Statement": [{
                                "Effect": "Allow",
                                "Action": ["secretsmanager:GetSecretValue", "secretsmanager:DescribeSecret"],
                                "Resource": secret_resources,
                            }],
                        },
                    }]),
                ),
        )?;

        let container_name = format!("{resource_name}-container");
        let mut container = json!({
            "Name": container_name,
            "Image": image.uri(),
            "Essential": true,
            "PortMappings": [{
                "ContainerPort": options.container_port,
                "HostPort": options.container_port,
                "Protocol": "tcp",
            }],
            "Secrets": vars
                .secrets
                .iter()
                .map(|(name, value)| json!({ "Name": name, "ValueFrom": value.expose() }))
                .collect::<Vec<_>>(),
            "Environment": environment
                .iter()
                .map(|(name, value)| json!({ "Name": name, "Value": value }))
                .collect::<Vec<_>>(),
        });
        if let (Some(logging), Some(log_group)) = (&options.logging, &log_group) {
            container["LogConfiguration"] = json!({
                "LogDriver": "awslogs",
                "Options": {
                    "awslogs-group": reference(log_group),
                    "awslogs-region": options.region,
                    "awslogs-stream-prefix": logging.stream_prefix,
                },
            });
        }

        let task_definition = template.add(
            ResourceDecl::new(&["Ecs", "TaskDefinition"], "AWS::ECS::TaskDefinition")
                .property("Family", format!("{resource_name}-task"))
                .property("Cpu", shape.cpu.to_string())
                .property("Memory", shape.memory_mib.to_string())
                .property("NetworkMode", "awsvpc")
                .property("RequiresCompatibilities", json!(["FARGATE"]))
                .property(
                    "RuntimePlatform",
                    json!({
                        "CpuArchitecture": shape.architecture.platform_name(),
                        "OperatingSystemFamily": "LINUX",
                    }),
                )
                .property("ExecutionRoleArn", attribute(&execution_role, "Arn"))
                .property("ContainerDefinitions", json!([container])),
        )?;

        info!(
            image = %image,
            cpu = shape.cpu,
            memory_mib = shape.memory_mib,
            architecture = shape.architecture.platform_name(),
            secrets = vars.secrets.len(),
            "compute task defined"
        );

        Ok(Self {
            name: format!("{resource_name}-service"),
            cluster,
            task_definition,
            container_name,
            container_port: options.container_port,
            desired_count: options.desired_count,
            subnets: subnets.subnet_refs(),
            security_group: policy.group_id(),
            service: None,
            scaling: None,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cluster_id(&self) -> &LogicalId {
        &self.cluster
    }

    pub fn task_definition_id(&self) -> &LogicalId {
        &self.task_definition
    }

    pub fn container_name(&self) -> &str {
        &self.container_name
    }

    pub fn desired_count(&self) -> u32 {
        self.desired_count
    }

    /// The service resource, once declared.
    pub fn service_id(&self) -> Option<&LogicalId> {
        self.service.as_ref()
    }

    pub fn scaling(&self) -> Option<&ScalingAttachment> {
        self.scaling.as_ref()
    }

    /// Declare the service without a load balancer if it is not declared yet.
    pub fn deploy(&mut self, template: &mut Template) -> ComposeResult<LogicalId> {
        match &self.service {
            Some(id) => Ok(id.clone()),
            None => self.declare_service(template, None),
        }
    }

    /// Attach step scaling on average CPU. Allowed once per service.
    pub fn attach_scaling(
        &mut self,
        template: &mut Template,
        policy: &ScalingPolicy,
    ) -> ComposeResult<&ScalingAttachment> {
        if self.scaling.is_some() {
            return Err(ComposeError::configuration(
                RESOURCE,
                "scaling",
                "a scaling policy is already attached",
            ));
        }
        policy.validate()?;
        policy.check_desired(self.desired_count)?;
        let service = self.deploy(template)?;

        let target = template.add(
            ResourceDecl::new(
                &["Ecs", "Service", "TaskCount", "Target"],
                "AWS::ApplicationAutoScaling::ScalableTarget",
            )
            .property("MinCapacity", policy.min)
            .property("MaxCapacity", policy.max)
            .property(
                "ResourceId",
                join(vec![
                    json!("service/"),
                    reference(&self.cluster),
                    json!("/"),
                    attribute(&service, "Name"),
                ]),
            )
            .property("ScalableDimension", "ecs:service:DesiredCount")
            .property("ServiceNamespace", "ecs")
            .property(
                "RoleARN",
                json!({
                    "Fn::Sub": "arn:${AWS::Partition}:iam::${AWS::AccountId}:role/aws-service-role/ecs.application-autoscaling.amazonaws.com/AWSServiceRoleForApplicationAutoScaling_ECSService"
                }),
            ),
        )?;

        let dimensions = json!([
            { "Name": "ClusterName", "Value": reference(&self.cluster) },
            { "Name": "ServiceName", "Value": attribute(&service, "Name") },
        ]);

        let mut declare_step = |direction: &str,
                                adjustment: i64,
                                bound: &str,
                                threshold: f64,
                                comparison: &str|
         -> ComposeResult<(LogicalId, LogicalId)> {
            let policy_path = format!("{direction}Policy");
            let alarm_path = format!("{direction}Alarm");
            let mut step = serde_json::Map::new();
            step.insert(bound.to_string(), json!(0));
            step.insert("ScalingAdjustment".to_string(), json!(adjustment));
            let step_policy = template.add(
                ResourceDecl::new(
                    &["Ecs", "Service", "TaskCount", "StepScaling", policy_path.as_str()],
                    "AWS::ApplicationAutoScaling::ScalingPolicy",
                )
                .property("PolicyName", format!("{}-cpu-{}", self.name, direction.to_lowercase()))
                .property("PolicyType", "StepScaling")
                .property("ScalingTargetId", reference(&target))
                .property(
                    "StepScalingPolicyConfiguration",
                    json!({
                        "AdjustmentType": "ChangeInCapacity",
                        "Cooldown": policy.cooldown.as_secs(),
                        "MetricAggregationType": "Average",
                        "StepAdjustments": [step],
                    }),
                ),
            )?;
            let alarm = template.add(
                ResourceDecl::new(
                    &["Ecs", "Service", "TaskCount", "StepScaling", alarm_path.as_str()],
                    "AWS::CloudWatch::Alarm",
                )
                .property("ComparisonOperator", comparison)
                .property("EvaluationPeriods", 1)
                .property("MetricName", "CPUUtilization")
                .property("Namespace", "AWS/ECS")
                .property("Dimensions", dimensions.clone())
                .property("Period", policy.period.as_secs())
                .property("Statistic", "Average")
                .property("Threshold", threshold)
                .property("AlarmActions", json!([reference(&step_policy)])),
            )?;
            debug!(%step_policy, %alarm, threshold, adjustment, "step scaling declared");
            Ok((step_policy, alarm))
        };

        let (scale_out, out_alarm) = declare_step(
            "Upper",
            i64::from(policy.step),
            "MetricIntervalLowerBound",
            policy.scale_out_cpu,
            "GreaterThanOrEqualToThreshold",
        )?;
        let (scale_in, in_alarm) = declare_step(
            "Lower",
            -i64::from(policy.step),
            "MetricIntervalUpperBound",
            policy.scale_in_cpu,
            "LessThanOrEqualToThreshold",
        )?;

        info!(
            service = %self.name,
            min = policy.min,
            max = policy.max,
            scale_out_cpu = policy.scale_out_cpu,
            scale_in_cpu = policy.scale_in_cpu,
            cooldown_secs = policy.cooldown.as_secs(),
            "scaling attached"
        );

        let attachment = self.scaling.insert(ScalingAttachment {
            target,
            scale_out,
            scale_in,
            alarms: [out_alarm, in_alarm],
            policy: policy.clone(),
        });
        Ok(&*attachment)
    }

    fn declare_service(
        &mut self,
        template: &mut Template,
        binding: Option<&TargetBinding>,
    ) -> ComposeResult<LogicalId> {
        let mut decl = ResourceDecl::new(&["Ecs", "Service"], "AWS::ECS::Service")
            .property("ServiceName", self.name.as_str())
            .property("Cluster", reference(&self.cluster))
            .property("TaskDefinition", reference(&self.task_definition))
            .property("LaunchType", "FARGATE")
            .property("DesiredCount", self.desired_count)
            .property(
                "NetworkConfiguration",
                json!({
                    "AwsvpcConfiguration": {
                        "AssignPublicIp": "DISABLED",
                        "SecurityGroups": [self.security_group],
                        "Subnets": self.subnets,
                    }
                }),
            )
            .property(
                "DeploymentConfiguration",
                json!({ "MinimumHealthyPercent": 50, "MaximumPercent": 200 }),
            );
        if let Some(binding) = binding {
            decl = decl
                .property(
                    "LoadBalancers",
                    json!([{
                        "ContainerName": self.container_name,
                        "ContainerPort": binding.port,
                        "TargetGroupArn": reference(&binding.target_group),
                    }]),
                )
                .property("HealthCheckGracePeriodSeconds", HEALTH_CHECK_GRACE_SECS)
                // The target group only accepts registrations once a listener uses it.
                .depends_on(&binding.listener);
        }
        let id = template.add(decl)?;
        info!(
            service = %self.name,
            desired = self.desired_count,
            load_balanced = binding.is_some(),
            "compute service declared"
        );
        self.service = Some(id.clone());
        Ok(id)
    }
}

impl LoadBalancerTarget for ComputeService {
    fn target_name(&self) -> &str {
        &self.name
    }

    fn target_port(&self) -> u16 {
        self.container_port
    }

    fn register(&mut self, template: &mut Template, binding: &TargetBinding) -> ComposeResult<()> {
        if self.service.is_some() {
            return Err(ComposeError::resource(
                RESOURCE,
                "service is already declared; register targets before deploying or scaling it",
            ));
        }
        self.declare_service(template, Some(binding))?;
        Ok(())
    }
}
