//! Demo binary: spawns a handful of worker threads sharing one simulation
//! group, drives a few ticks of append -> barrier -> merge -> exchange ->
//! dispatch, and prints a queue report. Mirrors the teacher's `main.rs`
//! shape (`examples/mstange-samply/samply/src/main.rs`): `env_logger::init`,
//! `clap::Parser::parse`, then a direct call into the library with errors
//! reported via `eprintln!` + a non-zero exit.

mod cli;

use std::process;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Barrier};

use clap::Parser;
use dispatch_core::exchange::NullExchange;
use dispatch_core::record::{DataId, Direction, RecordHeader};
use dispatch_core::registry::{
    Binding, DispatchCtx, Eref, ElementId, ElementTable, Handler, Registry,
};
use dispatch_core::tick::ProcInfo;
use dispatch_core::{introspect, Dispatcher};

const GREETING_MSG: u32 = 1;
const GREETING_ELEMENT: ElementId = ElementId(1);

struct PrintHandler {
    delivered: AtomicU32,
}

impl Handler for PrintHandler {
    fn op(&self, target: Eref, _header: &RecordHeader, payload: &[u8]) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
        log::debug!(
            "delivered {} bytes to element {:?} row {}",
            payload.len(),
            target.element,
            target.data_id.row
        );
    }
}

struct GreetingTable {
    handler: PrintHandler,
}

impl ElementTable for GreetingTable {
    fn get_op_func(&self, _function_id: u32) -> Option<&dyn Handler> {
        Some(&self.handler)
    }

    fn is_global(&self) -> bool {
        true
    }

    fn is_data_here(&self, _row: u32, _ctx: &ProcInfo) -> bool {
        true
    }
}

struct GreetingBinding;

impl Binding for GreetingBinding {
    fn e1(&self) -> ElementId {
        ElementId(0)
    }

    fn e2(&self) -> ElementId {
        GREETING_ELEMENT
    }

    fn exec(&self, header: &RecordHeader, payload: &[u8], ctx: &DispatchCtx<'_>) {
        let target_element = DispatchCtx::target_of(self, header.direction);
        let Some(table) = ctx.registry.get_element(target_element) else {
            return;
        };
        let Some(handler) = table.get_op_func(header.function_id) else {
            return;
        };
        let eref = Eref {
            element: target_element,
            data_id: header.src_index,
        };
        handler.op(eref, header, payload);
    }
}

struct DemoRegistry {
    binding: GreetingBinding,
    table: GreetingTable,
}

impl Registry for DemoRegistry {
    fn get_msg(&self, message_id: u32) -> Option<&dyn Binding> {
        (message_id == GREETING_MSG).then_some(&self.binding as &dyn Binding)
    }

    fn get_element(&self, id: ElementId) -> Option<&dyn ElementTable> {
        (id == GREETING_ELEMENT).then_some(&self.table as &dyn ElementTable)
    }
}

fn run(args: cli::DemoArgs) -> Result<(), dispatch_core::error::DispatchError> {
    let registry = Arc::new(DemoRegistry {
        binding: GreetingBinding,
        table: GreetingTable {
            handler: PrintHandler {
                delivered: AtomicU32::new(0),
            },
        },
    });

    let dispatcher = Arc::new(parking_lot::Mutex::new(Dispatcher::new(
        NullExchange,
        args.block_size,
        args.threads,
    )));
    dispatcher.lock().add_group(args.threads, args.nodes);

    let barrier = Arc::new(Barrier::new(args.threads));

    let handles: Vec<_> = (0..args.threads)
        .map(|thread_index| {
            let dispatcher = dispatcher.clone();
            let registry = registry.clone();
            let barrier = barrier.clone();
            let ticks = args.ticks;
            let messages_per_thread = args.messages_per_thread;

            std::thread::spawn(move || -> Result<(), dispatch_core::error::DispatchError> {
                for tick in 0..ticks {
                    {
                        let mut d = dispatcher.lock();
                        let outbox = d.outbox_mut(thread_index).expect("thread has an outbox");
                        for seq in 0..messages_per_thread {
                            let payload = format!("tick {tick} thread {thread_index} msg {seq}");
                            outbox.append(
                                &registry.binding,
                                Direction::Forward,
                                GREETING_MSG,
                                0,
                                DataId::new(thread_index as u32, seq),
                                registry.table.is_global(),
                                payload.as_bytes(),
                            );
                        }
                    }

                    barrier.wait();

                    if thread_index == 0 {
                        let mut d = dispatcher.lock();
                        let proc = ProcInfo::new(0, args.nodes as u32, 0, args.threads as u32, 0);
                        d.mpi_clear_queue(0, registry.as_ref(), &proc)?;
                    }

                    barrier.wait();
                }
                Ok(())
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("worker thread panicked")?;
    }

    let report = introspect::report_detailed(&dispatcher.lock(), registry.as_ref())?;
    print!("{report}");
    Ok(())
}

fn main() {
    env_logger::init();
    let args = cli::DemoArgs::parse();

    if let Err(err) = run(args) {
        eprintln!("dispatch-demo: {err}");
        process::exit(1);
    }
}
