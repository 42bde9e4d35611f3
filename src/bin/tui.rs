use crossterm::{
    event::{self, Event, KeyCode},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use heap_arena::HeapArena;
use ratatui::{
    backend::CrosstermBackend,
    prelude::*,
    widgets::{Block, Borders, Paragraph},
    Terminal,
};
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::thread;
use std::time::Duration;

#[derive(Default, Clone)]
struct ArenaSnapshot {
    free_sizes: Vec<usize>,
    page_count: usize,
}

struct SharedStats {
    ops_count: AtomicU64,
    allocated_bytes: AtomicU64,
    free_bytes: AtomicU64,
    snapshot: RwLock<ArenaSnapshot>,
}

impl SharedStats {
    fn new() -> Self {
        Self {
            ops_count: AtomicU64::new(0),
            allocated_bytes: AtomicU64::new(0),
            free_bytes: AtomicU64::new(0),
            snapshot: RwLock::new(ArenaSnapshot::default()),
        }
    }
}

// Renders a crude ASCII histogram of free-node sizes bucketed into powers of two.
fn render_free_size_histogram(free_sizes: &[usize]) -> String {
    let mut buckets = [0u32; 12]; // 2^4 .. 2^15+
    for &size in free_sizes {
        let bucket = (usize::BITS - size.max(1).leading_zeros()).min(15).saturating_sub(4) as usize;
        buckets[bucket.min(buckets.len() - 1)] += 1;
    }
    let max = buckets.iter().copied().max().unwrap_or(1).max(1) as f32;

    let mut out = String::new();
    for (i, &count) in buckets.iter().enumerate() {
        let lo = 1usize << (i + 4);
        let bar_len = ((count as f32 / max) * 30.0) as usize;
        let bar = "█".repeat(bar_len);
        out.push_str(&format!("{:>6}B {} {}\n", lo, bar, count));
    }
    out
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let stats = Arc::new(SharedStats::new());
    let stats_clone = stats.clone();

    thread::spawn(move || {
        let mut arena = HeapArena::default();
        let mut live: Vec<std::ptr::NonNull<u8>> = Vec::new();
        let mut rng = 0x9e3779b97f4a7c15u64;
        let mut loop_count = 0u64;

        loop {
            const BATCH_SIZE: u64 = 500;
            for _ in 0..BATCH_SIZE {
                rng = rng.wrapping_mul(6364136223846793005).wrapping_add(1);
                let r = rng >> 32;

                if live.is_empty() || r % 3 != 0 {
                    let size = 16 + (r % 512) as usize;
                    if let Ok(ptr) = arena.allocate(size) {
                        live.push(ptr);
                    }
                } else {
                    let idx = (r as usize) % live.len();
                    let ptr = live.swap_remove(idx);
                    arena.free(ptr);
                }
            }

            loop_count += 1;
            stats_clone.ops_count.fetch_add(BATCH_SIZE, Ordering::Relaxed);
            stats_clone
                .allocated_bytes
                .store(arena.allocated_bytes() as u64, Ordering::Relaxed);
            stats_clone
                .free_bytes
                .store(arena.free_bytes() as u64, Ordering::Relaxed);

            if loop_count % 10 == 0 {
                if let Ok(mut guard) = stats_clone.snapshot.write() {
                    guard.free_sizes = arena.free_sizes();
                    guard.page_count = arena.page_count();
                }
            }

            if live.len() > 4000 {
                for p in live.drain(..) {
                    arena.free(p);
                }
            }
        }
    });

    let mut last_ops = 0;
    let mut last_time = std::time::Instant::now();
    let mut throughput = 0.0;

    loop {
        if event::poll(Duration::from_millis(50))? {
            if let Event::Key(key) = event::read()? {
                if key.code == KeyCode::Char('q') {
                    break;
                }
            }
        }

        let now = std::time::Instant::now();
        if now.duration_since(last_time).as_secs_f64() >= 1.0 {
            let current_ops = stats.ops_count.load(Ordering::Relaxed);
            throughput = (current_ops - last_ops) as f64;
            last_ops = current_ops;
            last_time = now;
        }

        terminal.draw(|f| {
            let chunks = Layout::default()
                .direction(Direction::Vertical)
                .margin(1)
                .constraints(
                    [
                        Constraint::Length(3),
                        Constraint::Min(15),
                        Constraint::Length(6),
                    ]
                    .as_ref(),
                )
                .split(f.size());

            let header = Block::default().borders(Borders::ALL).title("heap-arena live dashboard");
            let title = Paragraph::new("synthetic workload | Press 'q' to quit")
                .block(header)
                .alignment(Alignment::Center)
                .style(Style::default().fg(Color::Cyan));
            f.render_widget(title, chunks[0]);

            let snapshot = stats.snapshot.read().unwrap();
            let hist_text = render_free_size_histogram(&snapshot.free_sizes);
            let hist_widget = Paragraph::new(hist_text).block(
                Block::default()
                    .borders(Borders::ALL)
                    .title("Free-size histogram")
                    .style(Style::default().fg(Color::Green)),
            );
            f.render_widget(hist_widget, chunks[1]);

            let allocated = stats.allocated_bytes.load(Ordering::Relaxed);
            let free = stats.free_bytes.load(Ordering::Relaxed);
            let used = allocated.saturating_sub(free);
            let largest_free = snapshot.free_sizes.iter().copied().max().unwrap_or(0) as f64;
            let fragmentation = if free > 0 {
                1.0 - (largest_free / free as f64)
            } else {
                0.0
            };

            let stats_text = format!(
                "Throughput: {:.0} ops/sec\nPages: {}\nAllocated: {} B  Used: {} B  Free: {} B\nFragmentation ratio: {:.3}",
                throughput, snapshot.page_count, allocated, used, free, fragmentation
            );
            let stats_widget = Paragraph::new(stats_text)
                .block(Block::default().borders(Borders::ALL).title("Arena telemetry"))
                .style(Style::default().fg(Color::Yellow));
            f.render_widget(stats_widget, chunks[2]);
        })?;
    }

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    Ok(())
}
