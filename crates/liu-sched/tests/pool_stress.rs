//! 线程池并发压力测试.
//!
//! 小槽环 + 多线程下验证槽复用安全、闸门顺序、无进展终止和关闭活性.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::{Duration, Instant};

use liu_sched::{Barrier, PoolOptions, Task, ThreadPool, WaitCounter};
use proptest::prelude::*;

fn pool<P: Send + Sync + 'static>(num_threads: usize, capacity: usize) -> ThreadPool<P> {
    ThreadPool::new(PoolOptions {
        num_threads,
        capacity,
        busy_wait: Duration::from_micros(50),
        thread_name: "StressThread".into(),
    })
    .expect("创建线程池失败")
}

/// 单个任务实例的执行记录
#[derive(Default)]
struct RunRecord {
    in_flight: AtomicU32,
    runs: AtomicU32,
    overlap: AtomicBool,
}

fn record_run(_: usize, record: &Arc<RunRecord>) -> bool {
    if record.in_flight.fetch_add(1, Ordering::AcqRel) != 0 {
        record.overlap.store(true, Ordering::Release);
    }
    for _ in 0..64 {
        std::hint::spin_loop();
    }
    record.runs.fetch_add(1, Ordering::AcqRel);
    record.in_flight.fetch_sub(1, Ordering::AcqRel);
    true
}

#[test]
fn test_slot_reuse_never_double_runs() {
    let pool = pool::<Arc<RunRecord>>(8, 4);
    let counter = Arc::new(WaitCounter::new());
    let records: Vec<Arc<RunRecord>> = (0..2000).map(|_| Arc::new(RunRecord::default())).collect();
    for record in &records {
        pool.add_task(Task::new(record_run, Arc::clone(record)).with_counter(Arc::clone(&counter)));
    }
    counter.wait();
    pool.shutdown(true);

    for (i, record) in records.iter().enumerate() {
        assert!(!record.overlap.load(Ordering::Acquire), "任务 {i} 被两个线程同时执行");
        assert_eq!(record.runs.load(Ordering::Acquire), 1, "任务 {i} 应恰好执行一次");
    }
}

struct Chain {
    value: AtomicU32,
    observed: AtomicU32,
}

fn chain_first(_: usize, chain: &Arc<Chain>) -> bool {
    std::thread::sleep(Duration::from_millis(5));
    chain.value.store(42, Ordering::Relaxed);
    true
}

fn chain_second(_: usize, chain: &Arc<Chain>) -> bool {
    chain
        .observed
        .store(chain.value.load(Ordering::Relaxed), Ordering::Relaxed);
    true
}

#[test]
fn test_barrier_orders_dependent_task() {
    let pool = pool::<Arc<Chain>>(4, 8);
    let chain = Arc::new(Chain {
        value: AtomicU32::new(0),
        observed: AtomicU32::new(0),
    });
    let first_done = Arc::new(Barrier::new());
    let second_done = Arc::new(Barrier::new());

    // 依赖方先提交, 只能等待闸门打开
    pool.add_task(
        Task::new(chain_second, Arc::clone(&chain))
            .with_barrier(Arc::clone(&first_done))
            .with_done(Arc::clone(&second_done)),
    );
    pool.add_task(Task::new(chain_first, Arc::clone(&chain)).with_done(Arc::clone(&first_done)));

    second_done.wait();
    assert_eq!(
        chain.observed.load(Ordering::Relaxed),
        42,
        "依赖任务必须看到前置任务的全部写入"
    );
}

fn never_done(_: usize, _: &()) -> bool {
    false
}

fn done(_: usize, _: &()) -> bool {
    true
}

#[test]
fn test_unsatisfiable_barrier_terminates() {
    let pool = pool::<()>(0, 4);
    let never_opened = Arc::new(Barrier::new());
    pool.add_task(Task::new(done, ()).with_barrier(Arc::clone(&never_opened)));
    pool.add_task(Task::new(done, ()));

    let started = Instant::now();
    assert!(!pool.process_tasks_on_main_thread(), "无法满足的闸门应报告未全部完成");
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(pool.pending_tasks(), 1);
}

#[test]
fn test_shutdown_when_idle() {
    let pool = pool::<()>(6, 16);
    std::thread::sleep(Duration::from_millis(20));
    let started = Instant::now();
    pool.shutdown(true);
    assert!(started.elapsed() < Duration::from_secs(5), "空闲线程应及时观察到退出标志");
}

#[test]
fn test_shutdown_when_busy() {
    let pool = pool::<()>(4, 64);
    for _ in 0..32 {
        pool.add_task(Task::new(never_done, ()));
    }
    let blocked = Arc::new(Barrier::new());
    for _ in 0..16 {
        pool.add_task(Task::new(done, ()).with_barrier(Arc::clone(&blocked)));
    }
    std::thread::sleep(Duration::from_millis(20));
    let started = Instant::now();
    pool.shutdown(true);
    assert!(
        started.elapsed() < Duration::from_secs(5),
        "持续重试和被阻塞的任务不应妨碍关闭"
    );
}

/// 依赖图节点: 等待若干前驱的完成闸门
struct Node {
    runs: AtomicU32,
    preds: Vec<Arc<Node>>,
    order_ok: AtomicBool,
}

fn node_work(_: usize, node: &Arc<Node>) -> bool {
    let preds_done = node.preds.iter().all(|p| p.runs.load(Ordering::Acquire) == 1);
    node.order_ok.store(preds_done, Ordering::Release);
    node.runs.fetch_add(1, Ordering::AcqRel);
    true
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// 任意无环依赖图, 以任意顺序提交, 都能在调用线程上全部完成且前驱先于后继
    #[test]
    fn prop_main_thread_completes_any_dag(
        edges in prop::collection::vec(
            prop::collection::vec(any::<prop::sample::Index>(), 0..3),
            1..24,
        ),
        seed in any::<u64>(),
    ) {
        let mut nodes: Vec<Arc<Node>> = Vec::new();
        let mut dones: Vec<Arc<Barrier>> = Vec::new();
        let mut tasks = Vec::new();
        for (i, picks) in edges.iter().enumerate() {
            let mut preds = Vec::new();
            let mut barriers = Vec::new();
            if i > 0 {
                for pick in picks {
                    let j = pick.index(i);
                    preds.push(Arc::clone(&nodes[j]));
                    barriers.push(Arc::clone(&dones[j]));
                }
            }
            let node = Arc::new(Node {
                runs: AtomicU32::new(0),
                preds,
                order_ok: AtomicBool::new(false),
            });
            let done = Arc::new(Barrier::new());
            tasks.push(
                Task::new(node_work, Arc::clone(&node))
                    .with_barriers(barriers)
                    .with_done(Arc::clone(&done)),
            );
            nodes.push(node);
            dones.push(done);
        }

        // 按种子打乱提交顺序
        let mut order: Vec<usize> = (0..tasks.len()).collect();
        let mut state = seed | 1;
        for i in (1..order.len()).rev() {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            order.swap(i, (state % (i as u64 + 1)) as usize);
        }
        let mut slots: Vec<Option<Task<Arc<Node>>>> = tasks.into_iter().map(Some).collect();

        let pool = pool::<Arc<Node>>(0, 32);
        for idx in order {
            if let Some(task) = slots[idx].take() {
                pool.add_task(task);
            }
        }
        prop_assert!(pool.process_tasks_on_main_thread());
        for node in &nodes {
            prop_assert_eq!(node.runs.load(Ordering::Acquire), 1);
            prop_assert!(node.order_ok.load(Ordering::Acquire));
        }
    }
}
