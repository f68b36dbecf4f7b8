use std::io::IsTerminal;

use clap::Parser;
use facet::Facet;
use indicatif::ProgressBar;

use herd::archive::ZipReader;
use herd::catalog::{LaunchPlan, WorkflowCatalog};
use herd::cli::{Cli, Command, OutputFormat, WorkflowsCommand};
use herd::config;
use herd::fetch::HttpFetcher;
use herd::logging;
use herd::provision::VmProvisioningRequest;
use herd::util::ByteSize;
use herd::workflow::WorkflowInfo;

type Catalog = WorkflowCatalog<HttpFetcher, ZipReader>;

#[derive(Facet)]
struct PlanJson {
    workflow: String,
    image: String,
    cpus: u32,
    memory: String,
    disk: String,
    timeout_s: u64,
    cloud_init: Option<String>,
}

#[tokio::main]
async fn main() -> miette::Result<()> {
    let cli = Cli::parse();

    logging::init(cli.verbose, cli.log_file.as_deref())?;

    let config = config::load_config(cli.config.as_deref())?;
    let settings = config.workflows.catalog_settings();
    let fetcher = HttpFetcher::new(config.workflows.download_timeout())?;

    // Spinner only when a human is watching and tracing isn't writing to stderr
    let spinner = (std::io::stderr().is_terminal() && !cli.verbose).then(|| {
        let s = ProgressBar::new_spinner();
        s.set_message("Fetching workflows...");
        s.enable_steady_tick(std::time::Duration::from_millis(120));
        s
    });
    let catalog = WorkflowCatalog::new(settings, fetcher, ZipReader).await;
    if let Some(s) = spinner {
        s.finish_and_clear();
    }
    let catalog = catalog?;

    let Command::Workflows { action } = cli.command;
    match action {
        WorkflowsCommand::List { refresh } => {
            if refresh {
                catalog.refresh_now().await?;
            }
            let workflows = catalog.all_workflows().await?;
            print_list(&workflows, cli.output);
        }
        WorkflowsCommand::Info { name } => {
            let info = catalog.info_for(&name).await?;
            print_info(&info, cli.output);
        }
        WorkflowsCommand::Plan {
            name,
            cpus,
            memory,
            disk,
        } => {
            let mut request = VmProvisioningRequest {
                num_cores: cpus.unwrap_or(0),
                mem_size: memory.unwrap_or_default(),
                disk_space: disk.unwrap_or_default(),
                ..Default::default()
            };
            run_plan(&catalog, &name, &mut request, cli.output).await?;
        }
    }

    Ok(())
}

fn print_list(workflows: &[WorkflowInfo], output: OutputFormat) {
    if output == OutputFormat::Json {
        println!(
            "{}",
            facet_json::to_string(&workflows.to_vec()).expect("JSON serialization")
        );
        return;
    }

    if workflows.is_empty() {
        println!("No workflows found.");
        return;
    }

    let names: Vec<String> = workflows.iter().map(|w| w.aliases.join(", ")).collect();
    let name_width = names.iter().map(String::len).max().unwrap_or(0).max(4);
    let version_width = workflows
        .iter()
        .map(|w| w.version.len())
        .max()
        .unwrap_or(0)
        .max(7);

    println!("{:<name_width$}  {:<version_width$}  DESCRIPTION", "NAME", "VERSION");
    for (name, w) in names.iter().zip(workflows) {
        println!("{name:<name_width$}  {:<version_width$}  {}", w.version, w.title);
    }
}

fn print_info(info: &WorkflowInfo, output: OutputFormat) {
    if output == OutputFormat::Json {
        println!("{}", facet_json::to_string(info).expect("JSON serialization"));
        return;
    }

    let (name, aliases): (&str, &[String]) = match info.aliases.split_first() {
        Some((name, rest)) => (name.as_str(), rest),
        None => ("", &[][..]),
    };
    println!("Name:        {name}");
    if !aliases.is_empty() {
        println!("Aliases:     {}", aliases.join(", "));
    }
    println!("Version:     {}", info.version);
    println!("Description: {}", info.title);
}

async fn run_plan(
    catalog: &Catalog,
    name: &str,
    request: &mut VmProvisioningRequest,
    output: OutputFormat,
) -> miette::Result<()> {
    let LaunchPlan {
        id: workflow,
        image,
        timeout_seconds: timeout_s,
    } = catalog.prepare_launch(name, request).await?;

    let cloud_init = if request.cloud_init.is_null() {
        None
    } else {
        serde_yaml::to_string(&request.cloud_init).ok()
    };

    if output == OutputFormat::Json {
        let plan = PlanJson {
            workflow,
            image: image.to_string(),
            cpus: request.num_cores,
            memory: size_or_default(request.mem_size),
            disk: size_or_default(request.disk_space),
            timeout_s,
            cloud_init,
        };
        println!("{}", facet_json::to_string(&plan).expect("JSON serialization"));
        return Ok(());
    }

    println!("Workflow: {workflow}");
    println!("Image:    {image}");
    if request.num_cores > 0 {
        println!("CPUs:     {}", request.num_cores);
    } else {
        println!("CPUs:     default");
    }
    println!("Memory:   {}", size_or_default(request.mem_size));
    println!("Disk:     {}", size_or_default(request.disk_space));
    if timeout_s > 0 {
        println!("Timeout:  {timeout_s}s");
    }
    if let Some(data) = cloud_init {
        println!("Cloud-init vendor data:");
        for line in data.lines() {
            println!("  {line}");
        }
    }
    Ok(())
}

fn size_or_default(size: ByteSize) -> String {
    if size.is_zero() {
        "default".into()
    } else {
        size.to_string()
    }
}
