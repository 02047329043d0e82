//! 组聚合器
//!
//! 把逐条结果按组 ID 归并成 `group_id -> Vec<T>`，保持首次出现的顺序。
//! 可以用上一阶段的组 ID 预先占位，这样没有任何结果的组也会以空列表出现。

use crate::models::work_item::GroupId;

/// 按组归并的结果，组顺序为首次出现（或预置）的顺序
#[derive(Debug, Clone, PartialEq)]
pub struct Grouped<T> {
    entries: Vec<(GroupId, Vec<T>)>,
}

impl<T> Default for Grouped<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<T> Grouped<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// 以给定的组 ID 预置空列表
    pub fn seeded(ids: impl IntoIterator<Item = GroupId>) -> Self {
        let mut grouped = Self::new();
        for id in ids {
            grouped.slot(id);
        }
        grouped
    }

    /// 从 (组 ID, 结果) 序列归并
    pub fn collect(pairs: impl IntoIterator<Item = (GroupId, T)>) -> Self {
        let mut grouped = Self::new();
        for (id, value) in pairs {
            grouped.push(id, value);
        }
        grouped
    }

    pub fn push(&mut self, id: GroupId, value: T) {
        self.slot(id).push(value);
    }

    pub fn get(&self, id: GroupId) -> Option<&[T]> {
        self.entries
            .iter()
            .find(|(gid, _)| *gid == id)
            .map(|(_, values)| values.as_slice())
    }

    /// 取出某组的结果（组不存在时返回空列表）
    pub fn take(&mut self, id: GroupId) -> Vec<T> {
        self.entries
            .iter_mut()
            .find(|(gid, _)| *gid == id)
            .map(|(_, values)| std::mem::take(values))
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (GroupId, &[T])> {
        self.entries.iter().map(|(id, values)| (*id, values.as_slice()))
    }

    fn slot(&mut self, id: GroupId) -> &mut Vec<T> {
        let index = match self.entries.iter().position(|(gid, _)| *gid == id) {
            Some(index) => index,
            None => {
                self.entries.push((id, Vec::new()));
                self.entries.len() - 1
            }
        };
        &mut self.entries[index].1
    }
}

impl<T> IntoIterator for Grouped<T> {
    type Item = (GroupId, Vec<T>);
    type IntoIter = std::vec::IntoIter<(GroupId, Vec<T>)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

/// 组级阶段的补全：保证上一阶段的每个组恰好有一条记录
///
/// 缺失的组由 `fallback` 生成；不属于上一阶段的组被丢弃。
/// 同一组出现多次时保留第一条。
pub fn complete_groups<T, F>(
    prior_ids: &[GroupId],
    results: impl IntoIterator<Item = (GroupId, T)>,
    mut fallback: F,
) -> Vec<(GroupId, T)>
where
    F: FnMut(GroupId) -> T,
{
    let mut grouped = Grouped::collect(results);
    prior_ids
        .iter()
        .map(|&id| {
            let value = grouped
                .take(id)
                .into_iter()
                .next()
                .unwrap_or_else(|| {
                    tracing::warn!("⚠️ [组 {}] 缺少结果，使用回退记录", id);
                    fallback(id)
                });
            (id, value)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grouping_preserves_first_seen_order_and_sizes() {
        let pairs = vec![
            (GroupId(2), "a"),
            (GroupId(0), "b"),
            (GroupId(2), "c"),
            (GroupId(5), "d"),
            (GroupId(0), "e"),
            (GroupId(2), "f"),
        ];
        let grouped = Grouped::collect(pairs);

        let ids: Vec<GroupId> = grouped.iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![GroupId(2), GroupId(0), GroupId(5)]);
        assert_eq!(grouped.get(GroupId(2)), Some(&["a", "c", "f"][..]));
        assert_eq!(grouped.get(GroupId(0)), Some(&["b", "e"][..]));
        assert_eq!(grouped.get(GroupId(5)), Some(&["d"][..]));
        assert_eq!(grouped.get(GroupId(9)), None);

        let total: usize = grouped.iter().map(|(_, v)| v.len()).sum();
        assert_eq!(total, 6);
    }

    #[test]
    fn test_seeded_groups_survive_without_results() {
        let mut grouped: Grouped<u32> = Grouped::seeded([GroupId(0), GroupId(1), GroupId(2)]);
        grouped.push(GroupId(2), 7);
        grouped.push(GroupId(0), 3);

        let collected: Vec<(GroupId, Vec<u32>)> = grouped.into_iter().collect();
        assert_eq!(
            collected,
            vec![
                (GroupId(0), vec![3]),
                (GroupId(1), vec![]),
                (GroupId(2), vec![7]),
            ]
        );
    }

    #[test]
    fn test_take_empties_group() {
        let mut grouped = Grouped::collect([(GroupId(1), 'x'), (GroupId(1), 'y')]);
        assert_eq!(grouped.take(GroupId(1)), vec!['x', 'y']);
        assert_eq!(grouped.take(GroupId(1)), Vec::<char>::new());
        assert_eq!(grouped.take(GroupId(4)), Vec::<char>::new());
        assert_eq!(grouped.len(), 1);
    }

    #[test]
    fn test_complete_groups_fills_missing() {
        let prior = [GroupId(0), GroupId(1), GroupId(2)];
        let results = vec![
            (GroupId(2), "synth-2".to_string()),
            (GroupId(7), "orphan".to_string()),
            (GroupId(0), "synth-0".to_string()),
        ];
        let completed = complete_groups(&prior, results, |id| format!("fallback-{id}"));

        assert_eq!(
            completed,
            vec![
                (GroupId(0), "synth-0".to_string()),
                (GroupId(1), "fallback-1".to_string()),
                (GroupId(2), "synth-2".to_string()),
            ]
        );
    }
}
