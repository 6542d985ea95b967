use std::net::SocketAddr;
use std::thread;
use clap::Parser;
use log::{error, info};
use tessera::{
    ChecksumType,
    Communicator,
    ConsolidatedData,
    DataLocation,
    DataType,
    Grid,
    GridLayout,
    GridPatch,
    LocalCommunicator,
    ModelConfig,
    TcpHost,
};




#[derive(Clone, Debug, Parser)]
#[clap(version = "0.1")]


/**
 * Build a cubed-sphere grid, distribute it over a number of ranks, exchange
 * halos once, and write the layout and a consolidated snapshot to a CBOR
 * file.
 */
struct Opts {
    #[clap(short = 'r', long, default_value = "24")]
    resolution: i64,

    #[clap(short = 'g', long, default_value = "2")]
    halo: usize,

    #[clap(short = 's', long, default_value = "2")]
    split: usize,

    #[clap(short = 'n', long, default_value = "4")]
    ranks: usize,

    #[clap(short = 't', long, default_value = "1")]
    tracers: usize,

    #[clap(short = 'o', long, default_value = "cubed_sphere.cbor")]
    output: String,

    /// Rank of this process when running over TCP
    #[clap(long)]
    rank: Option<usize>,

    /// Comma-separated peer addresses in rank order; runs over TCP when given
    #[clap(long)]
    peers: Option<String>,
}




#[derive(serde::Serialize)]


/**
 * What the root writes at the end of the run
 */
struct Snapshot {
    layout: GridLayout,
    model: ModelConfig,
    checksum_l2: Vec<f64>,
    patches: Vec<ConsolidatedData>,
}




fn initial_condition(patch: &mut GridPatch, tracers: usize) {
    let b = patch.patch_box().clone();
    let interior = b.local_interior();
    let panel = b.panel() as f64;

    let state = patch.state_mut(0, DataLocation::Node);

    for (i, j) in interior.iter() {
        let (x, y) = (b.a_nodes()[i as usize], b.b_nodes()[j as usize]);
        state[(0, 0, i as usize, j as usize)] = 1.0 + 0.1 * x.sin() * y.cos();
        state[(1, 0, i as usize, j as usize)] = 0.0;
        state[(2, 0, i as usize, j as usize)] = 0.0;
    }
    if tracers > 0 {
        let q = patch.tracers_mut(0);

        for (i, j) in interior.iter() {
            for c in 0..tracers {
                q[(c, 0, i as usize, j as usize)] = panel + c as f64;
            }
        }
    }
}




fn run<C: Communicator>(comm: C, opts: &Opts) -> tessera::Result<Option<Snapshot>> {
    let model = ModelConfig::shallow_water(opts.halo, opts.tracers);
    let mut grid = Grid::cubed_sphere(model, comm, opts.resolution, opts.split)?;

    grid.distribute_patches();
    grid.initialize_connectivity()?;

    for n in grid.active_indices() {
        initial_condition(grid.patch_mut(n), opts.tracers);
    }
    grid.exchange(DataType::State, 0)?;

    let mut data_types = vec![DataType::State];

    if opts.tracers > 0 {
        grid.exchange(DataType::Tracers, 0)?;
        data_types.push(DataType::Tracers);
    }
    let checksum = grid.checksum(DataType::State, 0, ChecksumType::L2)?;
    let patches = grid.consolidate(&data_types)?;
    grid.barrier()?;

    Ok(checksum.map(|checksum_l2| Snapshot {
        layout: grid.to_layout(),
        model: grid.model().clone(),
        checksum_l2,
        patches,
    }))
}




fn run_threads(opts: &Opts) -> tessera::Result<Option<Snapshot>> {
    let threads: Vec<_> = LocalCommunicator::group(opts.ranks)
        .into_iter()
        .map(|comm| {
            let opts = opts.clone();
            thread::spawn(move || run(comm, &opts))
        })
        .collect();

    let mut snapshot = None;

    for thread in threads {
        if let Some(s) = thread.join().expect("a rank panicked")? {
            snapshot = Some(s)
        }
    }
    Ok(snapshot)
}




fn run_tcp(opts: &Opts, peers: &str) -> tessera::Result<Option<Snapshot>> {
    let peers = peers
        .split(',')
        .map(|p| p.trim().parse::<SocketAddr>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| tessera::Error::Configuration(format!("bad peer address: {}", e)))?;

    let (mut host, comm) = TcpHost::new(opts.rank.unwrap_or(0), peers)?;
    let snapshot = run(comm, opts);
    host.join();
    snapshot
}




fn main() {
    simple_logger::SimpleLogger::new()
        .with_level(log::LevelFilter::Info)
        .init()
        .unwrap();

    let opts = Opts::parse();
    info!("{:?}", opts);

    let result = match &opts.peers {
        Some(peers) => run_tcp(&opts, peers),
        None => run_threads(&opts),
    };

    match result {
        Ok(Some(snapshot)) => {
            info!("L2 checksum of the state: {:?}", snapshot.checksum_l2);

            let mut buffer = Vec::new();
            ciborium::ser::into_writer(&snapshot, &mut buffer).unwrap();
            std::fs::write(&opts.output, buffer).unwrap();
            info!("wrote {}", opts.output);
        }
        Ok(None) => {}
        Err(e) => {
            error!("{}", e);
            std::process::exit(1)
        }
    }
}
