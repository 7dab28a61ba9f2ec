use log::debug;
use rand::seq::SliceRandom;
use rand::Rng;

/// subject 索引序列上的循环游标.
///
/// 越过序列末尾时游标回到开头; 若开启了打乱, 则在继续之前重新抽取一个排列.
/// 回绕对调用方透明.
#[derive(Debug, Clone, Default)]
pub struct SubjectCursor {
    order: Vec<usize>,
    pos: usize,
    shuffle: bool,
    wraps: usize,
}

impl SubjectCursor {
    /// 初始化. 第一次调用 [`Self::next`] 时才会生成索引序列.
    #[inline]
    pub fn new(shuffle: bool) -> Self {
        Self {
            shuffle,
            ..Default::default()
        }
    }

    /// 取出下一个 subject 索引. `len == 0` 时返回 `None`.
    pub fn next<R: Rng>(&mut self, rng: &mut R, len: usize) -> Option<usize> {
        if len == 0 {
            return None;
        }
        if self.pos >= self.order.len() || self.order.len() != len {
            if !self.order.is_empty() {
                self.wraps += 1;
                debug!("subject cursor wrapped ({} times)", self.wraps);
            }
            self.order.clear();
            self.order.extend(0..len);
            if self.shuffle {
                self.order.shuffle(rng);
            }
            self.pos = 0;
        }
        let ans = self.order[self.pos];
        self.pos += 1;
        Some(ans)
    }

    /// 当前遍历中下一个要取出的位置.
    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    /// 当前遍历使用的索引序列. 尚未开始遍历时为空.
    #[inline]
    pub fn order(&self) -> &[usize] {
        &self.order
    }

    /// 已回绕的次数.
    #[inline]
    pub fn wraps(&self) -> usize {
        self.wraps
    }
}
