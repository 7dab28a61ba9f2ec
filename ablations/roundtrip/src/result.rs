//! 实验结果.

use std::io::{self, Write};
use std::time::Duration;

/// 一轮队列采样的统计.
#[derive(Debug, Default)]
pub struct QueueProfile {
    pub patches: usize,
    pub with_gtv: usize,
    pub failures: usize,
    pub elapsed: Duration,
}

/// 单个 subject 的往返重建结果.
#[derive(Debug)]
pub struct RoundtripProfile {
    pub id: String,
    pub patches: usize,
    /// 无标签或失败时为 `None`.
    pub exact: Option<bool>,
    pub elapsed: Duration,
}

const S4: &str = "    ";

fn describe_queue<W: Write>(p: &QueueProfile, w: &mut W) -> io::Result<()> {
    writeln!(w, "Queue epoch:")?;
    writeln!(w, "{S4}Patches popped: {}", p.patches)?;
    writeln!(w, "{S4}Patches containing GTV: {}", p.with_gtv)?;
    writeln!(w, "{S4}Failed pops: {}", p.failures)?;
    write!(w, "{S4}Total machine time: {} us", p.elapsed.as_micros())
}

fn describe_roundtrip<W: Write>(p: &RoundtripProfile, w: &mut W) -> io::Result<()> {
    let exact = match p.exact {
        Some(true) => "yes",
        Some(false) => "NO",
        None => "/",
    };
    write!(
        w,
        "{S4}{}: {} patches, exact = {exact}, {} us",
        p.id,
        p.patches,
        p.elapsed.as_micros()
    )
}

/// 实验最终结果.
pub struct RoundtripResult {
    pub queue: QueueProfile,
    pub roundtrips: Vec<RoundtripProfile>,
}

impl RoundtripResult {
    /// 是否每个带标签的 subject 都被精确重建.
    pub fn all_exact(&self) -> bool {
        self.roundtrips.iter().all(|r| r.exact != Some(false))
    }

    fn describe_into<W: Write>(&self, w: &mut W) -> io::Result<()> {
        describe_queue(&self.queue, w)?;
        writeln!(w)?;
        utils::sep_to(&mut *w)?;
        writeln!(w, "Round trips:")?;
        for r in self.roundtrips.iter() {
            describe_roundtrip(r, w)?;
            writeln!(w)?;
        }
        write!(w, "All exact: {}", self.all_exact())
    }

    /// 分析运行结果.
    pub fn analyze(&self) {
        utils::sep();
        let mut buf = Vec::with_capacity(1024);
        match self.describe_into(&mut buf) {
            Ok(()) => println!("{}", String::from_utf8_lossy(&buf)),
            Err(e) => eprintln!("Cannot describe result: {e}"),
        }
        utils::sep();
    }
}
