//! Fork/join threading: worker trees are stitched below the callpath that
//! forked them.

use std::sync::Arc;
use std::thread;

use arbor_runtime::{
    Definitions, Error, LocationId, LocationKind, NodeKind, Profile, ProfileConfig, RegionHandle,
    Registry, RegionType,
};

struct Run {
    profile: Profile,
    defs: Arc<Registry>,
    parallel: RegionHandle,
    work: RegionHandle,
}

fn setup() -> Run {
    let defs = Registry::shared();
    let profile = Profile::new(ProfileConfig::default(), defs.clone());
    profile
        .create_location(LocationId(0), 0, LocationKind::Cpu, None)
        .unwrap();
    profile.initialize(vec![]).unwrap();
    let parallel = defs.new_region("parallel", RegionType::Function);
    let work = defs.new_region("work", RegionType::Function);
    Run {
        profile,
        defs,
        parallel,
        work,
    }
}

#[test]
fn workers_share_the_master_callpath() {
    let run = setup();
    let p = &run.profile;
    let master = p.location(LocationId(0)).unwrap();
    let workers: Vec<_> = (1..=3)
        .map(|i| {
            p.create_location(LocationId(i), u64::from(i), LocationKind::Cpu, Some(LocationId(0)))
                .unwrap()
        })
        .collect();

    p.program_begin(&master, 0, &[], &[]).unwrap();
    p.enter(&master, 10, run.parallel, &[]).unwrap();
    p.fork(&master, 4, 1).unwrap();

    thread::scope(|s| {
        for worker in &workers {
            let work = run.work;
            s.spawn(move || {
                p.activate(worker, Some(LocationId(0)), 1).unwrap();
                assert_eq!(worker.current_depth(), 2);
                p.enter(worker, 20, work, &[]).unwrap();
                p.exit(worker, 30, work, &[]).unwrap();
                p.deactivate(worker, Some(LocationId(0))).unwrap();
            });
        }
        p.enter(&master, 20, run.work, &[]).unwrap();
        p.exit(&master, 40, run.work, &[]).unwrap();
    });

    p.join(&master).unwrap();
    p.exit(&master, 50, run.parallel, &[]).unwrap();
    p.program_end(&master, 60, &[], &[]).unwrap();

    let forest = p.process().unwrap();
    let order: Vec<u64> = forest.locations().iter().map(|l| l.thread).collect();
    assert_eq!(order, vec![0, 1, 2, 3]);

    let path = [run.defs.program_region(), run.parallel, run.work];
    let t = forest.tree();
    let master_work = forest
        .find_path(forest.thread_root(LocationId(0)).unwrap(), &path)
        .unwrap();
    assert_eq!(t.node(master_work).inclusive_time().sum, 20);
    let callpath = t.node(master_work).callpath();
    assert!(callpath.is_some());

    for i in 1..=3 {
        let root = forest.thread_root(LocationId(i)).unwrap();
        let work = forest.find_path(root, &path).unwrap();
        assert_eq!(t.node(work).callpath(), callpath);
        assert_eq!(t.node(work).count(), 1);
        assert_eq!(t.node(work).inclusive_time().sum, 10);

        // The copied fork path carries no visits of its own.
        let parallel = forest.find_path(root, &path[..2]).unwrap();
        assert_eq!(t.node(parallel).count(), 0);
        assert!(
            t.preorder(root)
                .iter()
                .all(|&n| !matches!(t.node(n).kind(), NodeKind::ThreadStart { .. }))
        );
    }
}

#[test]
fn nested_fork_from_a_thread_start_forwards_the_outer_fork_point() {
    let run = setup();
    let p = &run.profile;
    let master = p.location(LocationId(0)).unwrap();
    let outer = p
        .create_location(LocationId(1), 1, LocationKind::Cpu, Some(LocationId(0)))
        .unwrap();
    let inner = p
        .create_location(LocationId(2), 2, LocationKind::Cpu, Some(LocationId(1)))
        .unwrap();

    p.program_begin(&master, 0, &[], &[]).unwrap();
    p.enter(&master, 1, run.parallel, &[]).unwrap();
    p.fork(&master, 2, 1).unwrap();
    p.activate(&outer, Some(LocationId(0)), 1).unwrap();
    // Still on its thread start: the nested fork point is the master's.
    p.fork(&outer, 2, 7).unwrap();
    p.activate(&inner, Some(LocationId(1)), 7).unwrap();
    assert_eq!(inner.current_depth(), 2);
    p.enter(&inner, 5, run.work, &[]).unwrap();
    p.exit(&inner, 9, run.work, &[]).unwrap();
    p.deactivate(&inner, Some(LocationId(1))).unwrap();
    p.join(&outer).unwrap();
    p.deactivate(&outer, Some(LocationId(0))).unwrap();
    p.join(&master).unwrap();
    p.exit(&master, 10, run.parallel, &[]).unwrap();
    p.program_end(&master, 11, &[], &[]).unwrap();

    let forest = p.process().unwrap();
    let root = forest.thread_root(LocationId(2)).unwrap();
    let work = forest
        .find_path(root, &[run.defs.program_region(), run.parallel, run.work])
        .unwrap();
    assert_eq!(forest.tree().node(work).inclusive_time().sum, 4);
}

#[test]
fn reactivation_reuses_the_thread_start() {
    let run = setup();
    let p = &run.profile;
    let master = p.location(LocationId(0)).unwrap();
    let worker = p
        .create_location(LocationId(1), 1, LocationKind::Cpu, Some(LocationId(0)))
        .unwrap();

    p.enter(&master, 0, run.parallel, &[]).unwrap();
    p.fork(&master, 2, 1).unwrap();
    for round in 0..3 {
        p.activate(&worker, Some(LocationId(0)), 1).unwrap();
        p.enter(&worker, 10 * round + 1, run.work, &[]).unwrap();
        p.exit(&worker, 10 * round + 3, run.work, &[]).unwrap();
        p.deactivate(&worker, Some(LocationId(0))).unwrap();
    }

    let worker_root = worker.root();
    worker.with_tree(|t| {
        let starts: Vec<_> = t.children(worker_root).collect();
        assert_eq!(starts.len(), 1);
        assert!(matches!(
            t.node(starts[0]).kind(),
            NodeKind::ThreadStart { fork: Some(_) }
        ));
        let work = t
            .find_child(starts[0], &NodeKind::region(run.work))
            .unwrap();
        assert_eq!(t.node(work).count(), 3);
        assert_eq!(t.node(work).inclusive_time().sum, 6);
    });
    assert_eq!(worker.current_node(), None);
}

#[test]
fn exit_on_a_fresh_thread_start_stops_the_worker() {
    let run = setup();
    let p = &run.profile;
    let master = p.location(LocationId(0)).unwrap();
    let worker = p
        .create_location(LocationId(1), 1, LocationKind::Cpu, Some(LocationId(0)))
        .unwrap();

    p.enter(&master, 0, run.parallel, &[]).unwrap();
    p.fork(&master, 2, 1).unwrap();
    p.activate(&worker, Some(LocationId(0)), 1).unwrap();
    let start = worker.current_node().unwrap();
    let depth = worker.current_depth();

    let err = p.exit(&worker, 5, run.work, &[]).unwrap_err();
    assert!(matches!(
        err,
        Error::ExitWithoutEnter { location: LocationId(1), region } if region == run.work
    ));
    assert!(worker.is_stopped());
    assert_eq!(worker.current_node(), Some(start));
    assert_eq!(worker.current_depth(), depth);

    // Nothing after the failed exit reaches the worker's tree.
    p.enter(&worker, 6, run.work, &[]).unwrap();
    let worker_root = worker.root();
    worker.with_tree(|t| {
        let children: Vec<_> = t.children(worker_root).collect();
        assert_eq!(children, vec![start]);
        assert_eq!(t.children(start).count(), 0);
        assert_eq!(t.node(start).inclusive_time().sum, 0);
        assert_eq!(t.node(start).last_exit_time(), t.node(start).first_enter_time());
        assert_eq!(t.node(worker_root).inclusive_time().sum, 0);
    });

    p.enter(&master, 7, run.work, &[]).unwrap();
    p.exit(&master, 8, run.work, &[]).unwrap();
    assert!(!master.is_stopped());
}
