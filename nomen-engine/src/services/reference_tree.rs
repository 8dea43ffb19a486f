//! In-memory hierarchy of reference classifier codes
//!
//! Levels follow the code format: section `C`, class `25`, group `25.7`,
//! subgroup `25.73`, category `25.73.3`, subcategory `25.73.30`.

use std::collections::HashMap;

use crate::models::KpvedEntry;

/// Node of the reference tree
#[derive(Debug, Clone)]
pub struct ReferenceNode {
    pub code: String,
    pub name: String,
    pub parent: Option<String>,
    pub level: u8,
    pub children: Vec<String>,
}

/// Level of a code by its format, `None` for malformed codes
pub fn code_level(code: &str) -> Option<u8> {
    let bytes = code.as_bytes();
    if bytes.len() == 1 && bytes[0].is_ascii_uppercase() {
        return Some(1);
    }

    let parts: Vec<&str> = code.split('.').collect();
    if !parts.iter().all(|p| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit())) {
        return None;
    }

    match parts.as_slice() {
        [class] if class.len() == 2 => Some(2),
        [class, group] if class.len() == 2 && group.len() == 1 => Some(3),
        [class, sub] if class.len() == 2 && sub.len() == 2 => Some(4),
        [class, sub, cat] if class.len() == 2 && sub.len() == 2 && cat.len() == 1 => Some(5),
        [class, sub, cat] if class.len() == 2 && sub.len() == 2 && cat.len() == 2 => Some(6),
        _ => None,
    }
}

/// Parent implied by the code format; classes and sections have none
pub fn derive_parent_code(code: &str) -> Option<String> {
    match code_level(code)? {
        3 | 5 => code.rsplit_once('.').map(|(head, _)| head.to_string()),
        4 | 6 => Some(code[..code.len() - 1].to_string()),
        _ => None,
    }
}

#[derive(Debug, Clone, Default)]
pub struct KpvedTree {
    nodes: HashMap<String, ReferenceNode>,
    roots: Vec<String>,
}

impl KpvedTree {
    pub fn from_entries(entries: &[KpvedEntry]) -> Self {
        let mut nodes: HashMap<String, ReferenceNode> = entries
            .iter()
            .map(|e| {
                (
                    e.code.clone(),
                    ReferenceNode {
                        code: e.code.clone(),
                        name: e.name.clone(),
                        parent: None,
                        level: code_level(&e.code).unwrap_or(0),
                        children: Vec::new(),
                    },
                )
            })
            .collect();

        let mut links: Vec<(String, Option<String>)> = Vec::with_capacity(entries.len());
        for entry in entries {
            let parent = entry
                .parent_code
                .clone()
                .filter(|p| !p.is_empty() && nodes.contains_key(p))
                .or_else(|| derive_parent_code(&entry.code).filter(|p| nodes.contains_key(p)));
            links.push((entry.code.clone(), parent));
        }

        let mut roots = Vec::new();
        for (code, parent) in links {
            match parent {
                Some(parent_code) => {
                    if let Some(parent_node) = nodes.get_mut(&parent_code) {
                        parent_node.children.push(code.clone());
                    }
                    if let Some(node) = nodes.get_mut(&code) {
                        node.parent = Some(parent_code);
                    }
                }
                None => roots.push(code),
            }
        }

        for node in nodes.values_mut() {
            node.children.sort();
            node.children.dedup();
        }
        roots.sort();
        roots.dedup();

        Self { nodes, roots }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, code: &str) -> Option<&ReferenceNode> {
        self.nodes.get(code)
    }

    pub fn contains(&self, code: &str) -> bool {
        self.nodes.contains_key(code)
    }

    pub fn roots(&self) -> &[String] {
        &self.roots
    }

    pub fn nodes(&self) -> impl Iterator<Item = &ReferenceNode> {
        self.nodes.values()
    }

    /// Ancestors from the direct parent up to the root
    pub fn ancestors(&self, code: &str) -> Vec<&ReferenceNode> {
        let mut chain = Vec::new();
        let mut cursor = self.nodes.get(code).and_then(|n| n.parent.as_deref());
        while let Some(parent_code) = cursor {
            match self.nodes.get(parent_code) {
                Some(parent) => {
                    // Guard against malformed cyclic parent links
                    if chain.len() > self.nodes.len() {
                        break;
                    }
                    chain.push(parent);
                    cursor = parent.parent.as_deref();
                }
                None => break,
            }
        }
        chain
    }

    /// Nodes from the root down to `code` inclusive
    pub fn path(&self, code: &str) -> Vec<&ReferenceNode> {
        let Some(node) = self.nodes.get(code) else {
            return Vec::new();
        };
        let mut path = self.ancestors(code);
        path.reverse();
        path.push(node);
        path
    }

    /// Whether `code` equals `ancestor` or lies below it
    pub fn is_descendant_of(&self, code: &str, ancestor: &str) -> bool {
        code == ancestor || self.ancestors(code).iter().any(|n| n.code == ancestor)
    }

    /// Deepest shared ancestor and the number of steps up from each side
    pub fn lowest_common_ancestor(&self, a: &str, b: &str) -> Option<(&ReferenceNode, usize, usize)> {
        let path_a: Vec<&str> = std::iter::once(a)
            .chain(self.ancestors(a).into_iter().map(|n| n.code.as_str()))
            .collect();
        let path_b: Vec<&str> = std::iter::once(b)
            .chain(self.ancestors(b).into_iter().map(|n| n.code.as_str()))
            .collect();

        for (steps_a, code) in path_a.iter().enumerate() {
            if let Some(steps_b) = path_b.iter().position(|c| c == code) {
                return self.nodes.get(*code).map(|node| (node, steps_a, steps_b));
            }
        }
        None
    }

    /// Nodes at `level`, optionally restricted to the children of `parent`
    pub fn nodes_at_level(&self, level: u8, parent: Option<&str>) -> Vec<&ReferenceNode> {
        let mut found: Vec<&ReferenceNode> = match parent {
            Some(parent_code) => self
                .nodes
                .get(parent_code)
                .map(|p| p.children.iter().filter_map(|c| self.nodes.get(c)).collect())
                .unwrap_or_default(),
            None => self.nodes.values().collect(),
        };
        found.retain(|n| n.level == level);
        found.sort_by(|a, b| a.code.cmp(&b.code));
        found
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Small slice of the reference table shared by classifier tests
    pub(crate) fn sample_entries() -> Vec<KpvedEntry> {
        vec![
            KpvedEntry::new("C", "Продукция обрабатывающих производств", None),
            KpvedEntry::new("25", "Изделия металлические готовые, кроме машин и оборудования", Some("C")),
            KpvedEntry::new("25.7", "Изделия ножевые, инструменты и универсальные скобяные изделия", None),
            KpvedEntry::new("25.73", "Инструменты", None),
            KpvedEntry::new("25.73.1", "Инструменты ручные для сельского хозяйства", None),
            KpvedEntry::new("25.73.11", "Лопаты и заступы", None),
            KpvedEntry::new("25.73.3", "Инструменты ручные прочие", None),
            KpvedEntry::new("25.73.30", "Инструменты ручные прочие: молотки, кувалды, ключи гаечные", None),
            KpvedEntry::new("25.9", "Изделия металлические готовые прочие", None),
            KpvedEntry::new("25.93", "Изделия из проволоки, цепи и пружины", None),
            KpvedEntry::new("25.93.1", "Изделия из проволоки, цепи и пружины", None),
            KpvedEntry::new("25.93.11", "Болты, винты, гайки и аналогичные изделия", None),
            KpvedEntry::new("27", "Оборудование электрическое", Some("C")),
            KpvedEntry::new("27.3", "Кабели и электромонтажные устройства", None),
            KpvedEntry::new("27.32", "Провода и кабели электронные и электрические прочие", None),
            KpvedEntry::new("27.32.1", "Провода и кабели электронные и электрические прочие", None),
            KpvedEntry::new("27.32.11", "Кабели силовые", None),
        ]
    }

    #[test]
    fn test_code_levels() {
        assert_eq!(code_level("C"), Some(1));
        assert_eq!(code_level("25"), Some(2));
        assert_eq!(code_level("25.7"), Some(3));
        assert_eq!(code_level("25.73"), Some(4));
        assert_eq!(code_level("25.73.3"), Some(5));
        assert_eq!(code_level("25.73.30"), Some(6));
        assert_eq!(code_level("2X.1"), None);
        assert_eq!(code_level("cc"), None);
    }

    #[test]
    fn test_derived_parents() {
        assert_eq!(derive_parent_code("25.73.30").as_deref(), Some("25.73.3"));
        assert_eq!(derive_parent_code("25.73.3").as_deref(), Some("25.73"));
        assert_eq!(derive_parent_code("25.73").as_deref(), Some("25.7"));
        assert_eq!(derive_parent_code("25.7").as_deref(), Some("25"));
        assert_eq!(derive_parent_code("25"), None);
    }

    #[test]
    fn test_path_runs_from_section() {
        let tree = KpvedTree::from_entries(&sample_entries());
        let codes: Vec<&str> = tree.path("25.73.30").iter().map(|n| n.code.as_str()).collect();
        assert_eq!(codes, vec!["C", "25", "25.7", "25.73", "25.73.3", "25.73.30"]);
        assert_eq!(tree.roots(), &["C".to_string()]);
    }

    #[test]
    fn test_lowest_common_ancestor() {
        let tree = KpvedTree::from_entries(&sample_entries());
        let (node, a, b) = tree.lowest_common_ancestor("25.73.30", "25.73.11").unwrap();
        assert_eq!(node.code, "25.73");
        assert_eq!((a, b), (2, 2));

        let (node, _, _) = tree.lowest_common_ancestor("25.93.11", "27.32.11").unwrap();
        assert_eq!(node.code, "C");
    }

    #[test]
    fn test_nodes_at_level_sorted() {
        let tree = KpvedTree::from_entries(&sample_entries());
        let classes: Vec<&str> = tree.nodes_at_level(2, None).iter().map(|n| n.code.as_str()).collect();
        assert_eq!(classes, vec!["25", "27"]);

        let groups: Vec<&str> = tree.nodes_at_level(3, Some("25")).iter().map(|n| n.code.as_str()).collect();
        assert_eq!(groups, vec!["25.7", "25.9"]);
    }

    #[test]
    fn test_descendant_check() {
        let tree = KpvedTree::from_entries(&sample_entries());
        assert!(tree.is_descendant_of("25.73.30", "25.7"));
        assert!(!tree.is_descendant_of("25.93.11", "25.7"));
    }
}
