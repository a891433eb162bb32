//! Workflow definition endpoints.
//!
//! Besides the workflow's own `name`, a definition references other named
//! resources from its (arbitrarily nested) tasks: worker tasks name a task
//! definition, sub-workflow tasks name another workflow. Those references
//! are qualified on the way in and stripped on the way out. References into
//! the Global namespace are shared and pass through untouched.

use serde_json::Value;

use super::taskdefs::qualify_path_name;
use super::{listing_mut, qualify_name, strip_tenant_prefix, unqualify_name};
use crate::body::rebuild;
use crate::error::{Result, TenancyError};
use crate::jsonpath::{Location, PathExpr};
use crate::naming;
use crate::policy::{assert_allowed_workflow_task, task_type, SIMPLE_TASK};
use crate::routes::{Forward, HookContext, HttpMethod, InboundResponse, OutboundRequest, Route};
use crate::tenant::TenantId;

const COLLECTION: &str = "/api/metadata/workflow";
const SINGLETON: &str = "/api/metadata/workflow/:name";
const VERSIONED: &str = "/api/metadata/workflow/:name/:version";

const SUB_WORKFLOW: &str = "SUB_WORKFLOW";

pub fn routes() -> Vec<Route> {
    vec![
        Route::new(HttpMethod::Get, COLLECTION).after(list_after),
        Route::new(HttpMethod::Post, COLLECTION).before(create_before),
        Route::new(HttpMethod::Put, COLLECTION).before(update_before),
        Route::new(HttpMethod::Get, SINGLETON)
            .before(qualify_path_name)
            .after(get_one_after),
        Route::new(HttpMethod::Delete, VERSIONED).before(qualify_path_name),
    ]
}

/// Compiled expressions for locating tasks and the names they reference.
struct References {
    top_level: PathExpr,
    nested: Vec<PathExpr>,
    worker: PathExpr,
    sub_workflow: PathExpr,
}

impl References {
    fn new() -> Result<Self> {
        Ok(Self {
            top_level: PathExpr::parse("$.tasks[*]")?,
            // task lists held by control-flow tasks, relative to the task
            nested: [
                "$.decisionCases.*[*]",
                "$.defaultCase[*]",
                "$.forkTasks[*][*]",
                "$.loopOver[*]",
            ]
            .into_iter()
            .map(PathExpr::parse)
            .collect::<Result<Vec<_>>>()?,
            worker: PathExpr::parse("$.name")?,
            sub_workflow: PathExpr::parse("$.subWorkflowParam.name")?,
        })
    }

    /// Every task in the workflow, each before the tasks it contains.
    ///
    /// Only task containers are followed; free-form objects such as
    /// `inputParameters` are never mistaken for tasks.
    fn tasks(&self, workflow: &Value) -> Vec<Location> {
        let mut found = Vec::new();
        for location in self.top_level.find(workflow) {
            self.collect(workflow, location, &mut found);
        }
        found
    }

    fn collect(&self, workflow: &Value, task: Location, out: &mut Vec<Location>) {
        let Some(node) = task.get(workflow).filter(|node| node.is_object()) else {
            return;
        };
        let children: Vec<Location> = self
            .nested
            .iter()
            .flat_map(|expr| expr.find(node))
            .map(|relative| task.join(&relative))
            .collect();
        out.push(task);
        for child in children {
            self.collect(workflow, child, out);
        }
    }

    /// Where, relative to the task, the referenced name lives.
    fn for_task(&self, task: &Value) -> Option<&PathExpr> {
        match task_type(task) {
            SIMPLE_TASK => Some(&self.worker),
            SUB_WORKFLOW => Some(&self.sub_workflow),
            _ => None,
        }
    }
}

fn qualify_workflow(tenant: &TenantId, workflow: &mut Value) -> Result<()> {
    if !workflow.is_object() {
        return Err(TenancyError::MalformedBody(
            "expected a workflow definition object".to_owned(),
        ));
    }
    let refs = References::new()?;
    let tasks = refs.tasks(workflow);

    for location in &tasks {
        if let Some(task) = location.get(workflow) {
            assert_allowed_workflow_task(task)?;
        }
    }

    qualify_name(tenant, workflow)?;
    for location in &tasks {
        let Some(task) = location.get_mut(workflow) else {
            continue;
        };
        let Some(path) = refs.for_task(task) else {
            continue;
        };
        for reference in path.find(task) {
            if let Some(Value::String(name)) = reference.get_mut(task) {
                if !naming::is_global(name) {
                    *name = naming::qualify(tenant.as_str(), name)?;
                }
            }
        }
    }
    Ok(())
}

fn strip_workflow(tenant: &TenantId, workflow: &mut Value) -> Result<()> {
    unqualify_name(tenant, workflow)?;

    let refs = References::new()?;
    for location in refs.tasks(workflow) {
        let Some(task) = location.get_mut(workflow) else {
            continue;
        };
        if let Some(path) = refs.for_task(task) {
            strip_tenant_prefix(tenant, task, path, true)?;
        }
    }
    Ok(())
}

fn list_after(ctx: &HookContext<'_>, resp: &mut InboundResponse) -> Result<()> {
    if !resp.status.is_success() {
        return Ok(());
    }
    let workflows = listing_mut(&mut resp.body)?;
    let tenant = ctx.tenant.as_str();
    workflows.retain(|workflow| {
        workflow
            .get("name")
            .and_then(Value::as_str)
            .is_some_and(|name| naming::is_owned_by(tenant, name))
    });
    for workflow in workflows.iter_mut() {
        strip_workflow(ctx.tenant, workflow)?;
    }
    Ok(())
}

fn create_before(ctx: &HookContext<'_>, req: &mut OutboundRequest) -> Result<Forward> {
    let mut workflow = req.json_body()?;
    qualify_workflow(ctx.tenant, &mut workflow)?;
    Ok(Forward::with_body(rebuild(&workflow, &mut req.headers)?))
}

fn update_before(ctx: &HookContext<'_>, req: &mut OutboundRequest) -> Result<Forward> {
    let mut body = req.json_body()?;
    let Value::Array(workflows) = &mut body else {
        return Err(TenancyError::MalformedBody(
            "expected an array of workflow definitions".to_owned(),
        ));
    };
    for workflow in workflows.iter_mut() {
        qualify_workflow(ctx.tenant, workflow)?;
    }
    Ok(Forward::with_body(rebuild(&body, &mut req.headers)?))
}

fn get_one_after(ctx: &HookContext<'_>, resp: &mut InboundResponse) -> Result<()> {
    if !resp.status.is_success() {
        return Ok(());
    }
    strip_workflow(ctx.tenant, &mut resp.body)
}
