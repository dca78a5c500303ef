//! DeviceGrid CLI - Command line interface for the DeviceGrid coordinator.

mod client;
mod error;

use clap::{Parser, Subcommand};
use serde_json::{json, Value};

use devicegrid_core::wire::{
    AssignmentResponse, DeviceResponse, DeviceStatusResponse, HeartbeatResponse,
    MessageResponse, RegisterResponse, SubmitResponse, TaskResponse,
};

use client::HttpClient;

/// DeviceGrid CLI - Coordinator management tool
#[derive(Parser)]
#[command(name = "devicegrid")]
#[command(about = "CLI for the DeviceGrid coordinator", long_about = None)]
struct Cli {
    /// Coordinator address
    #[arg(short, long, env = "DEVICEGRID_URL", default_value = "http://localhost:5000")]
    addr: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a device
    Register {
        /// Device ID
        device_id: String,
    },

    /// Send a heartbeat for a device
    Heartbeat {
        /// Device ID
        device_id: String,
    },

    /// Ask for the next input on behalf of a device
    Request {
        /// Device ID
        device_id: String,
    },

    /// Submit a result for an assigned input
    Submit {
        /// Task ID
        #[arg(short, long)]
        task: String,

        /// Device ID
        #[arg(short, long)]
        device: String,

        /// Input value the result is for
        #[arg(short, long)]
        input: String,

        /// Output produced by the device
        #[arg(short, long)]
        output: String,
    },

    /// List registered devices
    Devices,

    /// Show one device's status
    #[command(name = "device-status")]
    DeviceStatus {
        /// Device ID
        device_id: String,
    },

    /// Create a new task
    #[command(name = "create-task")]
    CreateTask {
        /// Reference to the code devices should run
        #[arg(short, long)]
        code_ref: String,

        /// Input values, one slot each
        #[arg(short, long = "input", required = true)]
        inputs: Vec<String>,

        /// Results needed before the task is done
        #[arg(short, long, default_value = "1")]
        required: u32,

        /// Priority (lower runs first)
        #[arg(short, long, default_value = "1")]
        priority: i32,

        /// Task IDs this task depends on
        #[arg(long = "depends-on")]
        dependencies: Vec<String>,
    },

    /// Get task details
    #[command(name = "get-task")]
    GetTask {
        /// Task ID
        id: String,
    },

    /// List all tasks, newest first
    #[command(name = "list-tasks")]
    ListTasks,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = HttpClient::new(&cli.addr);

    match cli.command {
        Commands::Register { device_id } => {
            let resp: RegisterResponse = client
                .post_json("/register-device", &json!({ "deviceId": device_id }))
                .await?;
            println!("{}:", resp.message);
            print_device(&resp.device);
        }
        Commands::Heartbeat { device_id } => {
            let resp: HeartbeatResponse = client
                .post_json("/heartbeat", &json!({ "deviceId": device_id }))
                .await?;
            println!("{} (status: {})", resp.message, resp.status);
        }
        Commands::Request { device_id } => {
            let resp: Value = client.get_json(&format!("/get-task/{device_id}")).await?;
            print_assignment(resp)?;
        }
        Commands::Submit {
            task,
            device,
            input,
            output,
        } => {
            let body = json!({
                "taskId": task,
                "deviceId": device,
                "input": input,
                "output": output,
            });
            let resp: SubmitResponse = client.post_json("/submit-result", &body).await?;
            println!("{}", resp.message);
            println!("  Results:    {}", resp.result_count);
            println!("  Completed:  {}", resp.completed);
        }
        Commands::Devices => {
            let devices: Vec<DeviceResponse> = client.get_json("/devices").await?;
            list_devices(&devices);
        }
        Commands::DeviceStatus { device_id } => {
            let resp: DeviceStatusResponse = client
                .get_json(&format!("/device-status/{device_id}"))
                .await?;
            println!("{}", resp.status);
        }
        Commands::CreateTask {
            code_ref,
            inputs,
            required,
            priority,
            dependencies,
        } => {
            let body = json!({
                "codeRef": code_ref,
                "inputs": inputs,
                "requiredDeviceCount": required,
                "priority": priority,
                "dependencies": dependencies,
            });
            let task: TaskResponse = client.post_json("/tasks", &body).await?;
            println!("Task created:");
            print_task(&task);
        }
        Commands::GetTask { id } => {
            let task: TaskResponse = client.get_json(&format!("/task/{id}")).await?;
            print_task(&task);
        }
        Commands::ListTasks => {
            let tasks: Vec<TaskResponse> = client.get_json("/all-tasks").await?;
            list_tasks(&tasks);
        }
    }

    Ok(())
}

/// A poll reply is either a lease or a message.
fn print_assignment(resp: Value) -> Result<(), Box<dyn std::error::Error>> {
    if resp.get("message").is_some() {
        let msg: MessageResponse = serde_json::from_value(resp)?;
        println!("{}", msg.message);
        return Ok(());
    }

    let lease: AssignmentResponse = serde_json::from_value(resp)?;
    println!("Input assigned:");
    println!("  Task:       {}", lease.task_id);
    println!("  Code:       {}", lease.code_ref);
    println!("  Input:      {}", lease.input);
    println!("  Slot:       {}", lease.slot);
    if let Some(url) = &lease.code_url {
        println!("  Code URL:   {url}");
    }
    Ok(())
}

fn list_devices(devices: &[DeviceResponse]) {
    println!("Devices ({}):", devices.len());
    println!("{:<24}  {:<12}  {:<26}  {}", "ID", "STATUS", "LAST HEARTBEAT", "LEASE");
    println!("{}", "-".repeat(80));

    for device in devices {
        let lease = device
            .lease
            .as_ref()
            .map(|l| format!("{}#{}", l.task_id, l.slot))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<24}  {:<12}  {:<26}  {}",
            device.device_id,
            device.status.to_uppercase(),
            device.last_heartbeat,
            lease
        );
    }
}

fn print_device(device: &DeviceResponse) {
    println!("  ID:         {}", device.device_id);
    println!("  Status:     {}", device.status.to_uppercase());
    println!("  Heartbeat:  {}", device.last_heartbeat);
}

fn list_tasks(tasks: &[TaskResponse]) {
    println!("Tasks ({}):", tasks.len());
    println!(
        "{:<36}  {:<8}  {:<8}  {:<8}  {}",
        "ID", "STATUS", "PRIORITY", "RESULTS", "CREATED"
    );
    println!("{}", "-".repeat(90));

    for task in tasks {
        let results = format!("{}/{}", task.results.len(), task.required_device_count);
        println!(
            "{:<36}  {:<8}  {:<8}  {:<8}  {}",
            task.id,
            task.status.to_uppercase(),
            task.priority,
            results,
            task.created_at
        );
    }
}

fn print_task(task: &TaskResponse) {
    println!("  ID:         {}", task.id);
    println!("  Code:       {}", task.code_ref);
    println!("  Status:     {}", task.status.to_uppercase());
    println!("  Priority:   {}", task.priority);
    println!(
        "  Results:    {}/{}",
        task.results.len(),
        task.required_device_count
    );
    println!("  Created:    {}", task.created_at);

    if !task.dependencies.is_empty() {
        println!("  Depends on: {}", task.dependencies.join(", "));
    }

    println!("  Inputs:");
    for slot in &task.inputs {
        match &slot.device_id {
            Some(device) => println!("    - {} -> {}", slot.input, device),
            None => println!("    - {} (unassigned)", slot.input),
        }
    }

    if !task.results.is_empty() {
        println!("  Output:");
        for result in &task.results {
            println!("    - {} [{}]: {}", result.input, result.device_id, result.output);
        }
    }
}
