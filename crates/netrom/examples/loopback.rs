//! Two nodes in one process, joined by an in-memory link.
//!
//! GB7AAA runs an echo service; GB7BBB learns its route from a NODES
//! announcement, opens a circuit and prints what comes back.
//!
//! - cargo run -p netrom --example loopback
//! - cargo run -p netrom --example loopback -- "some text" 3

use std::{env, sync::Arc, thread, time::Duration};

use netrom::{memory_link_pair, prelude::*};

/// Echoes every payload back on the same circuit.
struct Echo;

impl Service for Echo {
    fn name(&self) -> &str {
        "echo"
    }

    fn on_connect(&self, stream: CircuitStream) {
        thread::spawn(move || {
            while let Ok(data) = stream.recv() {
                if stream.send(&data).is_err() {
                    break;
                }
            }
        });
    }
}

fn node(callsign: &str, alias: &str, services: Arc<StaticServiceRegistry>) -> Result<Arc<NodeContext>, ErrorKind> {
    Ok(Arc::new(NodeContext::new(NodeConfig::default(), callsign.parse()?, Some(alias.parse()?), services)))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Args: [message] [count]
    let mut args = env::args().skip(1);
    let message = args.next().unwrap_or_else(|| "hello via netrom".to_string());
    let count: usize = args.next().unwrap_or_else(|| "2".into()).parse().unwrap_or(2);

    let a_services = Arc::new(StaticServiceRegistry::new());
    let a = node("GB7AAA", "AAA", a_services.clone())?;
    a_services.register(a.callsign().clone(), Arc::new(Echo));
    let b = node("GB7BBB", "BBB", Arc::new(StaticServiceRegistry::new()))?;

    let (a_end, b_end) = memory_link_pair();
    a.attach_link(b.callsign().clone(), 0, a_end)?;
    b.attach_link(a.callsign().clone(), 0, b_end)?;

    NodeService::new(a.clone()).broadcast_announcement();
    let target: Callsign = "AAA".parse()?;
    while b.routes().best_route_to(&target, b.now()).is_none() {
        thread::sleep(Duration::from_millis(10));
    }
    println!("GB7BBB routes: {:?}", b.routes().routes().iter().map(ToString::to_string).collect::<Vec<_>>());

    let stream = NodeService::new(b.clone()).connect_to_remote_node(&target, &"M0ABC".parse()?)?;
    println!("[connect] circuit {:?}", stream.circuit().my_circuit());

    for i in 0..count {
        let line = format!("{} #{}", message, i);
        stream.send(line.as_bytes())?;
        match stream.recv_timeout(Duration::from_secs(2))? {
            Some(reply) => println!("[reply] {}", String::from_utf8_lossy(&reply)),
            None => println!("[timeout] no echo for #{}", i),
        }
    }

    stream.close();
    println!("[stats] {:?}", b.stats());
    Ok(())
}
