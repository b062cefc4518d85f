//! 合成子要素
//!
//! 子要素は呼び出し時点の要素数で上限を決めた、遅延・有限・再開可能な列です。
//! `iter()` を呼ぶたびに先頭から読み直すため、同じ停止状態なら同じ列になります。

use crate::errors::{IntrospectionError, IntrospectionResult};
use crate::value::ValueHandle;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;
use tracing::warn;

/// 子要素1つ
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntheticChild {
    /// 表示名（`[0]`, フィールド名など）
    pub name: String,
    pub value: ValueHandle,
    /// マップ要素のキー
    pub key: Option<ValueHandle>,
}

impl SyntheticChild {
    pub fn new(name: impl Into<String>, value: ValueHandle) -> Self {
        Self {
            name: name.into(),
            value,
            key: None,
        }
    }

    /// キーと値の組
    pub fn entry(name: impl Into<String>, key: ValueHandle, value: ValueHandle) -> Self {
        Self {
            name: name.into(),
            value,
            key: Some(key),
        }
    }
}

type ChildIterator<'a> = Box<dyn Iterator<Item = IntrospectionResult<SyntheticChild>> + 'a>;
type ChildFactory<'a> = Rc<dyn Fn() -> ChildIterator<'a> + 'a>;

/// 合成子要素の列
#[derive(Clone)]
pub struct SyntheticChildren<'a> {
    count: usize,
    factory: ChildFactory<'a>,
}

impl<'a> SyntheticChildren<'a> {
    pub fn empty() -> Self {
        Self::from_vec(Vec::new())
    }

    /// 既に読み終えた子要素から作る
    pub fn from_vec(children: Vec<SyntheticChild>) -> Self {
        let count = children.len();
        let children = Rc::new(children);
        Self {
            count,
            factory: Rc::new(move || -> ChildIterator<'a> {
                let children = Rc::clone(&children);
                Box::new(
                    (0..children.len())
                        .map(move |i| -> IntrospectionResult<SyntheticChild> { Ok(children[i].clone()) }),
                )
            }),
        }
    }

    /// 添字から子要素を読む関数で作る
    pub fn indexed<F>(count: usize, produce: F) -> Self
    where
        F: Fn(usize) -> IntrospectionResult<SyntheticChild> + 'a,
    {
        let produce = Rc::new(produce);
        Self {
            count,
            factory: Rc::new(move || -> ChildIterator<'a> {
                let produce = Rc::clone(&produce);
                Box::new((0..count).map(move |i| produce(i)))
            }),
        }
    }

    /// 呼ぶたびに先頭から走査するイテレータを返す関数で作る
    ///
    /// 走査は `count` 個で打ち切ります。
    pub fn from_fn<F, I>(count: usize, make: F) -> Self
    where
        F: Fn() -> I + 'a,
        I: Iterator<Item = IntrospectionResult<SyntheticChild>> + 'a,
    {
        Self {
            count,
            factory: Rc::new(move || -> ChildIterator<'a> { Box::new(make()) }),
        }
    }

    /// 呼び出し時点の要素数
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// 先頭から走査する
    pub fn iter(&self) -> ChildIter<'a> {
        let inner = match catch_unwind(AssertUnwindSafe(|| (self.factory)())) {
            Ok(inner) => Some(inner),
            Err(_) => {
                warn!("synthetic children provider panicked before producing any child");
                None
            }
        };
        ChildIter {
            inner,
            remaining: self.count,
        }
    }

    /// `index` 番目の子要素
    pub fn get(&self, index: usize) -> Option<IntrospectionResult<SyntheticChild>> {
        self.iter().nth(index)
    }
}

impl<'s, 'a> IntoIterator for &'s SyntheticChildren<'a> {
    type Item = IntrospectionResult<SyntheticChild>;
    type IntoIter = ChildIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl fmt::Debug for SyntheticChildren<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("SyntheticChildren")
            .field("count", &self.count)
            .finish()
    }
}

/// 子要素のイテレータ
///
/// 子要素の生成中にパニックした場合はエラーを1つ返して終了します。
pub struct ChildIter<'a> {
    inner: Option<ChildIterator<'a>>,
    remaining: usize,
}

impl Iterator for ChildIter<'_> {
    type Item = IntrospectionResult<SyntheticChild>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let inner = self.inner.as_mut()?;

        match catch_unwind(AssertUnwindSafe(|| inner.next())) {
            Ok(Some(child)) => {
                self.remaining -= 1;
                Some(child)
            }
            Ok(None) => {
                self.remaining = 0;
                None
            }
            Err(_) => {
                warn!("synthetic children provider panicked");
                self.inner = None;
                self.remaining = 0;
                Some(Err(IntrospectionError::malformed(
                    "synthetic children provider panicked",
                )))
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.remaining))
    }
}
