//! Join tree
//!
//! The builder merges every navigation chain it sees into one tree rooted at
//! the query's table. Nodes are stored in an arena indexed by position;
//! children keep their insertion order, which makes alias assignment and the
//! generated SQL deterministic for a given sequence of builder calls.

use crate::error::{Error, Result};
use crate::node::{Node, NodeKind};
use compact_str::{CompactString, format_compact};
use smallvec::SmallVec;

/// One merged node of the join tree.
#[derive(Debug)]
pub(crate) struct TreeNode {
    /// The first chain link merged at this position
    pub source: Node,
    /// Table alias `t<n>`, column alias `c<n>`, or a manual alias
    pub alias: CompactString,
    pub parent: Option<usize>,
    pub children: SmallVec<[usize; 4]>,
    /// Extra ON condition for table-like nodes
    pub condition: Option<Node>,
    /// Array join flattened into duplicated parent rows
    pub expanded: bool,
    /// Column appears in the SELECT list
    pub selected: bool,
}

#[derive(Debug)]
pub(crate) struct JoinTree {
    nodes: Vec<TreeNode>,
    prefix: CompactString,
    next_table: u32,
    next_column: u32,
}

impl JoinTree {
    /// Creates a tree rooted at a table node. Generated aliases carry the
    /// prefix, which distinguishes subquery scopes within one statement.
    pub fn new(root: Node, prefix: &str) -> JoinTree {
        let mut tree = JoinTree {
            nodes: Vec::new(),
            prefix: CompactString::new(prefix),
            next_table: 0,
            next_column: 0,
        };
        let alias = root
            .alias()
            .map(CompactString::new)
            .unwrap_or_else(|| tree.next_alias(&root));
        tree.nodes.push(TreeNode {
            source: root,
            alias,
            parent: None,
            children: SmallVec::new(),
            condition: None,
            expanded: false,
            selected: false,
        });
        tree
    }

    #[inline]
    pub fn root(&self) -> &TreeNode {
        &self.nodes[0]
    }

    #[inline]
    pub fn node(&self, index: usize) -> &TreeNode {
        &self.nodes[index]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Merges a chain into the tree, reusing equivalent nodes level by level
    /// and splicing in the rest. Returns the index of the chain's last link.
    pub fn merge(&mut self, leaf: &Node) -> Result<usize> {
        let chain = leaf.chain();
        if !chain[0].equivalent(&self.nodes[0].source) {
            return Err(Error::CrossTableRoot {
                query_root: self.nodes[0]
                    .source
                    .target_table()
                    .unwrap_or_default()
                    .to_string(),
                node_root: chain[0].target_table().unwrap_or_default().to_string(),
            });
        }
        self.adopt_alias(0, &chain[0]);

        let mut at = 0usize;
        for link in chain.iter().skip(1) {
            at = match self.find_child(at, link) {
                Some(child) => {
                    self.adopt_alias(child, link);
                    child
                }
                None => self.splice(at, link),
            };
        }
        Ok(at)
    }

    /// Attaches an ON condition to a join, rejecting a second, different one.
    pub fn attach_condition(&mut self, index: usize, condition: Node) -> Result<()> {
        let node = &mut self.nodes[index];
        match &node.condition {
            Some(existing) if !existing.equivalent(&condition) => {
                Err(Error::ConflictingJoinCondition {
                    member: join_member_name(&node.source),
                })
            }
            Some(_) => Ok(()),
            None => {
                node.condition = Some(condition);
                Ok(())
            }
        }
    }

    #[inline]
    pub fn mark_expanded(&mut self, index: usize) {
        self.nodes[index].expanded = true;
    }

    #[inline]
    pub fn mark_selected(&mut self, index: usize) {
        self.nodes[index].selected = true;
    }

    /// Walks a chain without inserting, returning the matching node.
    pub fn find(&self, leaf: &Node) -> Option<usize> {
        let chain = leaf.chain();
        if !chain[0].equivalent(&self.nodes[0].source) {
            return None;
        }
        let mut at = 0usize;
        for link in chain.iter().skip(1) {
            at = self.find_child(at, link)?;
        }
        Some(at)
    }

    /// The selected primary-key column child of a table-like node.
    pub fn pk_child(&self, index: usize) -> Option<usize> {
        self.nodes[index].children.iter().copied().find(|&c| {
            matches!(self.nodes[c].source.kind(), NodeKind::Column { is_pk: true, .. })
        })
    }

    /// Children of a table-like node that join further tables, in order.
    pub fn table_children(&self, index: usize) -> impl Iterator<Item = usize> + '_ {
        self.nodes[index]
            .children
            .iter()
            .copied()
            .filter(|&c| self.nodes[c].source.is_table_like())
    }

    /// Selected column children of a table-like node, in order.
    pub fn selected_columns(&self, index: usize) -> impl Iterator<Item = usize> + '_ {
        self.nodes[index].children.iter().copied().filter(|&c| {
            self.nodes[c].selected && matches!(self.nodes[c].source.kind(), NodeKind::Column { .. })
        })
    }

    /// Indices in depth-first order starting at the root.
    pub fn walk(&self) -> Vec<usize> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![0usize];
        while let Some(at) = stack.pop() {
            order.push(at);
            for &child in self.nodes[at].children.iter().rev() {
                stack.push(child);
            }
        }
        order
    }

    fn find_child(&self, parent: usize, link: &Node) -> Option<usize> {
        self.nodes[parent]
            .children
            .iter()
            .copied()
            .find(|&c| self.nodes[c].source.equivalent(link))
    }

    fn splice(&mut self, parent: usize, link: &Node) -> usize {
        let alias = link
            .alias()
            .map(CompactString::new)
            .unwrap_or_else(|| self.next_alias(link));
        let index = self.nodes.len();
        self.nodes.push(TreeNode {
            source: link.clone(),
            alias,
            parent: Some(parent),
            children: SmallVec::new(),
            condition: None,
            expanded: false,
            selected: false,
        });
        self.nodes[parent].children.push(index);
        index
    }

    /// A manual alias on a merged chain link replaces the automatic alias of
    /// the tree node it matched.
    fn adopt_alias(&mut self, index: usize, link: &Node) {
        if let Some(alias) = link.alias()
            && self.nodes[index].alias != alias
        {
            self.nodes[index].alias = CompactString::new(alias);
        }
    }

    fn next_alias(&mut self, node: &Node) -> CompactString {
        if matches!(node.kind(), NodeKind::Column { .. }) {
            let alias = format_compact!("{}c{}", self.prefix, self.next_column);
            self.next_column += 1;
            alias
        } else {
            let alias = format_compact!("{}t{}", self.prefix, self.next_table);
            self.next_table += 1;
            alias
        }
    }
}

/// Plural member name of a join node, for error messages.
pub(crate) fn join_member_name(node: &Node) -> String {
    node.member_names()
        .map(|(_, plural)| plural.to_string())
        .or_else(|| node.target_table().map(str::to_string))
        .unwrap_or_default()
}
