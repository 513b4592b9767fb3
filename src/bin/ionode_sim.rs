use clap::{App, Arg};
use colored::*;
use ionode::config::NodeConfig;
use ionode::hal::{LedAction, LedColor, MotorDriver};
use ionode::loopback::{LoopbackBus, LoopbackPort};
use ionode::master::{Master, DEFAULT_REQUEST_TIMEOUT};
use ionode::message::Message;
use ionode::module::{BoardType, Hardware};
use ionode::node::Node;
use ionode::opcode;
use ionode::sim::{SimMotors, SimPeripherals, SimReboot};
use ionode::store::MemoryStore;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, Level};

const MASTER_ID: u8 = 1;
const FIRST_NODE_ID: u8 = 2;
const MAX_NODES: u8 = 32;
const SETTLE: Duration = Duration::from_millis(100);

const BOARD_ROTATION: [BoardType; 5] = [
    BoardType::Stepper,
    BoardType::Discrete,
    BoardType::Core,
    BoardType::RelayLp,
    BoardType::Mixed,
];

type SimNode = Node<LoopbackPort, LoopbackPort>;

struct Bench {
    node: SimNode,
    peripherals: Arc<SimPeripherals>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let matches = App::new("ionode-sim")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Runs a master and a set of I/O nodes on an in-process bus")
        .arg(
            Arg::with_name("nodes")
                .short("n")
                .long("nodes")
                .value_name("COUNT")
                .help("Number of nodes on the bus")
                .takes_value(true)
                .default_value("3"),
        )
        .arg(
            Arg::with_name("log-level")
                .short("l")
                .long("log-level")
                .value_name("LEVEL")
                .help("trace, debug, info, warn or error")
                .takes_value(true)
                .default_value("info"),
        )
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("FILE")
                .help("JSON node config applied to every node")
                .takes_value(true),
        )
        .get_matches();

    let level = Level::from_str(matches.value_of("log-level").unwrap_or("info"))?;
    tracing_subscriber::fmt().with_max_level(level).init();

    let count: u8 = matches.value_of("nodes").unwrap_or("3").parse()?;
    if count == 0 || count > MAX_NODES {
        return Err(format!("--nodes must be between 1 and {}", MAX_NODES).into());
    }
    let template = match matches.value_of("config") {
        Some(path) => Some(NodeConfig::load(path)?),
        None => None,
    };

    println!("{}", "I/O Node Bus Simulator".bright_cyan().bold());
    println!("{}", "======================".bright_cyan());

    let multidrop = LoopbackBus::new();
    let broadcast = LoopbackBus::new();

    let mut master = Master::new(MASTER_ID, Arc::new(multidrop.attach(MASTER_ID)))?;
    master.start()?;

    let mut benches = Vec::new();
    for index in 0..count {
        let id = FIRST_NODE_ID + index;
        let board_type = BOARD_ROTATION[usize::from(index) % BOARD_ROTATION.len()];
        let bench = build_node(id, board_type, template.as_ref(), &multidrop, &broadcast)?;
        benches.push(bench);
    }
    for bench in &mut benches {
        bench.node.start()?;
    }
    info!("{} node(s) online", benches.len());

    master.scan()?;
    tokio::time::sleep(SETTLE).await;
    println!("\n{}", "Discovered modules".bold());
    for found in master.discovery().found() {
        println!("  {} node {:>3}  {}", "●".green(), found.node, found.board_type.to_string().bright_white());
    }

    println!("\n{}", "Health".bold());
    for bench in &benches {
        let id = bench.node.id();
        match master.request(Message::new(opcode::PING, id), id, DEFAULT_REQUEST_TIMEOUT).await {
            Ok(reply) if reply.payload() == opcode::PING_SENTINEL => {
                print!("  {} node {:>3} ping ok", "✓".green(), id);
            }
            Ok(reply) => print!("  {} node {:>3} odd ping 0x{:X}", "?".yellow(), id, reply.payload()),
            Err(e) => {
                println!("  {} node {:>3} {}", "✗".red(), id, e.to_string().bright_red());
                continue;
            }
        }
        let request = Message::new(opcode::INTERNAL_TEMPERATURE, id);
        match master.request(request, id, DEFAULT_REQUEST_TIMEOUT).await {
            Ok(reply) => println!(", {:.1} °C", reply.payload_f32()),
            Err(e) => println!(", temperature unavailable ({})", e),
        }

        let blink = Message::with_payload(
            opcode::LED,
            id,
            u16::from_le_bytes([LedColor::Green as u8, LedAction::Blink as u8]),
            500,
        );
        if let Err(e) = master.request(blink, id, DEFAULT_REQUEST_TIMEOUT).await {
            error!("LED request to node {} failed: {}", id, e);
        }
    }

    if let Some(bench) = benches.iter().find(|b| b.node.module().board_type() == BoardType::Discrete) {
        let id = bench.node.id();
        let attach = Message::with_param(opcode::ATTACH_INPUT_NOTIFY, id, 0);
        master.request(attach, id, DEFAULT_REQUEST_TIMEOUT).await?;
        // the echo precedes the attach itself
        tokio::time::sleep(SETTLE).await;
        bench.peripherals.set_input(0, false);
        tokio::time::sleep(SETTLE).await;

        println!("\n{}", "Input events".bold());
        for event in master.notifications() {
            if event.message.command() == opcode::INPUT_EVENT {
                println!(
                    "  node {:>3} input {} -> {}",
                    event.source,
                    event.message.param(),
                    if event.message.payload() != 0 { "high".bright_white() } else { "low".yellow() }
                );
            }
        }
    }

    if let Some(bench) = benches.first() {
        println!("\n{} {}", "Command table of node".bold(), bench.node.id());
        for (command, address) in bench.node.table().list() {
            let name = opcode::name(command).unwrap_or("?");
            println!("  0x{:04X} {:<28} @ {}", command, name.cyan(), address);
        }
    }

    for bench in &mut benches {
        bench.node.stop();
    }
    master.stop();
    println!("\n{}", "Simulator stopped".bright_green());
    Ok(())
}

fn build_node(
    id: u8,
    board_type: BoardType,
    template: Option<&NodeConfig>,
    multidrop: &Arc<LoopbackBus>,
    broadcast: &Arc<LoopbackBus>,
) -> Result<Bench, Box<dyn std::error::Error>> {
    let mut config = template.cloned().unwrap_or_default();
    if template.is_none() {
        config.board = board_type.name().to_string();
    }
    config.default_id = id;
    config.master_id = MASTER_ID;
    let profile = config.board_type()?.profile();

    let peripherals = Arc::new(SimPeripherals::new(profile.inputs, profile.outputs));
    peripherals.set_temperature(20.0 + f32::from(id) * 0.5);
    let hardware = Hardware {
        peripherals: peripherals.clone(),
        motors: (profile.motors > 0).then(|| Arc::new(SimMotors::new(profile.motors)) as Arc<dyn MotorDriver>),
        reboot: Arc::new(SimReboot::new()),
        store: Arc::new(MemoryStore::new()),
    };
    let node = Node::create(
        &config,
        hardware,
        Arc::new(multidrop.attach(id)),
        Some(Arc::new(broadcast.attach(id))),
    )?;
    Ok(Bench { node, peripherals })
}
