use crate::app::App;
use crate::output::print_json;
use anyhow::Context;
use clap::Args;
use custodian_core::identity::{parse_date, TargetIdentity};
use custodian_core::queue::{ManualOverrideRequest, OverrideQueue};
use custodian_core::types::RequestStatus;

#[derive(Args)]
pub struct EnqueueArgs {
    /// Unique request id (e.g. HR ticket number)
    #[arg(long)]
    pub request_id: String,
    #[arg(long)]
    pub work_email: String,
    #[arg(long)]
    pub first_name: String,
    #[arg(long)]
    pub last_name: String,
    #[arg(long)]
    pub department: String,
    #[arg(long)]
    pub employment_type: String,
    /// First working day, YYYY-MM-DD
    #[arg(long)]
    pub start_date: String,
    #[arg(long)]
    pub title: Option<String>,
    #[arg(long)]
    pub manager_email: Option<String>,
    #[arg(long)]
    pub location: Option<String>,
    /// Evidence from the first system (e.g. `hris:record:123`)
    #[arg(long)]
    pub confirmation_source_a: String,
    /// Evidence from a second, independent system
    #[arg(long)]
    pub confirmation_source_b: String,
    #[arg(long)]
    pub reason: Option<String>,
    /// Queue as HOLD instead of READY
    #[arg(long)]
    pub hold: bool,
    /// Run even if start_date is in the future
    #[arg(long)]
    pub allow_before_start_date: bool,
    /// Replace an existing row with the same request id
    #[arg(long)]
    pub allow_update: bool,
}

impl EnqueueArgs {
    fn into_request(self) -> anyhow::Result<ManualOverrideRequest> {
        let mut identity = TargetIdentity::new(self.first_name, self.last_name, self.work_email);
        identity.department = self.department;
        identity.employment_type = self.employment_type;
        identity.title = self.title;
        identity.manager_email = self.manager_email;
        identity.location = self.location;
        identity.start_date = Some(parse_date(&self.start_date)?);

        let mut request = ManualOverrideRequest::new(
            self.request_id,
            identity,
            self.confirmation_source_a,
            self.confirmation_source_b,
        );
        request.reason = self.reason;
        request.allow_before_start_date = self.allow_before_start_date;
        if self.hold {
            request.status = RequestStatus::Hold;
        }
        Ok(request)
    }
}

pub fn run(app: &App, args: EnqueueArgs, json: bool) -> anyhow::Result<()> {
    let allow_update = args.allow_update;
    let request = args.into_request()?;
    let path = app.settings.override_queue_path();
    let queue = OverrideQueue::open(&path);
    queue.ensure().context("failed to create override queue")?;

    let outcome = queue
        .enqueue(&request, allow_update)
        .with_context(|| format!("cannot queue request '{}'", request.request_id))?;

    if json {
        print_json(&serde_json::json!({
            "request_id": request.request_id,
            "status": request.status,
            "outcome": outcome,
            "queue": path,
        }))?;
    } else {
        println!(
            "{:?} request {} ({}) for {} in {}",
            outcome,
            request.request_id,
            request.status,
            request.identity.email(),
            path.display()
        );
    }
    Ok(())
}
