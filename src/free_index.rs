//! Free-size index - a red-black tree over free `Node`s keyed by `size`.
//!
//! Equal sizes are kept out of the tree topology: the first node inserted at
//! a given size becomes the tree slot, and every later node of the same size
//! is prepended to that slot's duplicate chain (`dup_prev`/`dup_next`).
//! `remove` has three cases depending on where the node sits (duplicate-chain
//! member, tree slot with duplicates, or plain tree slot); only the last one
//! needs a real red-black deletion.
//!
//! The rotation/insert-fixup/delete-fixup routines below follow the
//! canonical red-black tree presentation (as in the Wikipedia article), with
//! deletion written iteratively: the two-child case swaps the node with its
//! in-order successor and falls through to the (at-most-one-child) cases.

use std::ptr::NonNull;

use crate::node::{Color, Node};

#[derive(Clone, Copy, PartialEq, Eq)]
enum Direction {
    Left,
    Right,
}

#[inline]
fn color_of(n: Option<NonNull<Node>>) -> Color {
    match n {
        Some(n) => unsafe { n.as_ref().color },
        None => Color::Black,
    }
}

/// The balanced tree of free nodes, keyed by `size`.
pub struct FreeSizeIndex {
    root: Option<NonNull<Node>>,
}

impl FreeSizeIndex {
    pub const fn new() -> Self {
        Self { root: None }
    }

    pub fn root(&self) -> Option<NonNull<Node>> {
        self.root
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Returns the free node of smallest `size >= s`, or `None`.
    pub fn find_best_fit(&self, s: usize) -> Option<NonNull<Node>> {
        let mut current = self.root;
        let mut candidate = None;
        while let Some(node) = current {
            let node_size = unsafe { node.as_ref().size };
            if node_size == s {
                return Some(node);
            } else if node_size < s {
                current = unsafe { node.as_ref().right };
            } else {
                candidate = Some(node);
                current = unsafe { node.as_ref().left };
            }
        }
        candidate
    }

    /// Inserts `n` into the index. `n` must be free, with `reset_free_links`
    /// already applied (red, no parent/children/duplicates).
    pub fn insert(&mut self, n: NonNull<Node>) {
        debug_assert!(unsafe { !n.as_ref().occupied });
        let Some(root) = self.root else {
            unsafe {
                (*n.as_ptr()).color = Color::Black;
            }
            self.root = Some(n);
            return;
        };

        let mut parent = root;
        loop {
            let parent_size = unsafe { parent.as_ref().size };
            let n_size = unsafe { n.as_ref().size };
            if parent_size == n_size {
                unsafe {
                    let old_next = parent.as_ref().dup_next;
                    (*n.as_ptr()).dup_next = old_next;
                    (*n.as_ptr()).dup_prev = Some(parent);
                    if let Some(old_next) = old_next {
                        (*old_next.as_ptr()).dup_prev = Some(n);
                    }
                    (*parent.as_ptr()).dup_next = Some(n);
                }
                return;
            } else if n_size < parent_size {
                match unsafe { parent.as_ref().left } {
                    Some(l) => parent = l,
                    None => {
                        unsafe {
                            (*parent.as_ptr()).left = Some(n);
                            (*n.as_ptr()).parent = Some(parent);
                        }
                        break;
                    }
                }
            } else {
                match unsafe { parent.as_ref().right } {
                    Some(r) => parent = r,
                    None => {
                        unsafe {
                            (*parent.as_ptr()).right = Some(n);
                            (*n.as_ptr()).parent = Some(parent);
                        }
                        break;
                    }
                }
            }
        }

        self.fix_insert(n);
    }

    /// Removes `n` from the index (tree slot, duplicate member, or both).
    pub fn remove(&mut self, n: NonNull<Node>) {
        unsafe {
            if let Some(prev) = n.as_ref().dup_prev {
                // Case 1: duplicate-chain member, not the tree slot.
                let next = n.as_ref().dup_next;
                (*prev.as_ptr()).dup_next = next;
                if let Some(next) = next {
                    (*next.as_ptr()).dup_prev = Some(prev);
                }
                return;
            }

            if let Some(successor) = n.as_ref().dup_next {
                // Case 2: tree slot with a non-empty duplicate chain; promote
                // the chain's head into the vacated tree slot.
                (*successor.as_ptr()).color = n.as_ref().color;
                (*successor.as_ptr()).left = n.as_ref().left;
                if let Some(l) = n.as_ref().left {
                    (*l.as_ptr()).parent = Some(successor);
                }
                (*successor.as_ptr()).right = n.as_ref().right;
                if let Some(r) = n.as_ref().right {
                    (*r.as_ptr()).parent = Some(successor);
                }
                (*successor.as_ptr()).dup_prev = None;

                let parent = n.as_ref().parent;
                (*successor.as_ptr()).parent = parent;
                match parent {
                    None => self.root = Some(successor),
                    Some(p) => {
                        if p.as_ref().left == Some(n) {
                            (*p.as_ptr()).left = Some(successor);
                        } else {
                            (*p.as_ptr()).right = Some(successor);
                        }
                    }
                }
                return;
            }

            // Case 3: plain tree slot; full red-black deletion.
            self.remove_node(n);
        }
    }

    fn rotate_left(&mut self, x: NonNull<Node>) {
        unsafe {
            let y = x.as_ref().right.expect("rotate_left requires a right child");
            (*x.as_ptr()).right = y.as_ref().left;
            if let Some(yl) = y.as_ref().left {
                (*yl.as_ptr()).parent = Some(x);
            }
            let gp = x.as_ref().parent;
            (*y.as_ptr()).parent = gp;
            match gp {
                None => self.root = Some(y),
                Some(g) => {
                    if g.as_ref().left == Some(x) {
                        (*g.as_ptr()).left = Some(y);
                    } else {
                        (*g.as_ptr()).right = Some(y);
                    }
                }
            }
            (*y.as_ptr()).left = Some(x);
            (*x.as_ptr()).parent = Some(y);
        }
    }

    fn rotate_right(&mut self, x: NonNull<Node>) {
        unsafe {
            let y = x.as_ref().left.expect("rotate_right requires a left child");
            (*x.as_ptr()).left = y.as_ref().right;
            if let Some(yr) = y.as_ref().right {
                (*yr.as_ptr()).parent = Some(x);
            }
            let gp = x.as_ref().parent;
            (*y.as_ptr()).parent = gp;
            match gp {
                None => self.root = Some(y),
                Some(g) => {
                    if g.as_ref().left == Some(x) {
                        (*g.as_ptr()).left = Some(y);
                    } else {
                        (*g.as_ptr()).right = Some(y);
                    }
                }
            }
            (*y.as_ptr()).right = Some(x);
            (*x.as_ptr()).parent = Some(y);
        }
    }

    fn fix_insert(&mut self, mut node: NonNull<Node>) {
        loop {
            let parent = match unsafe { node.as_ref().parent } {
                Some(p) => p,
                None => {
                    unsafe {
                        (*node.as_ptr()).color = Color::Black;
                    }
                    return;
                }
            };
            if unsafe { parent.as_ref().color } == Color::Black {
                return;
            }
            let grandparent = match unsafe { parent.as_ref().parent } {
                Some(g) => g,
                None => {
                    unsafe {
                        (*parent.as_ptr()).color = Color::Black;
                    }
                    return;
                }
            };

            let parent_is_left = unsafe { grandparent.as_ref().left } == Some(parent);
            let uncle = if parent_is_left {
                unsafe { grandparent.as_ref().right }
            } else {
                unsafe { grandparent.as_ref().left }
            };

            if color_of(uncle) == Color::Red {
                unsafe {
                    (*parent.as_ptr()).color = Color::Black;
                    (*uncle.unwrap().as_ptr()).color = Color::Black;
                    (*grandparent.as_ptr()).color = Color::Red;
                }
                node = grandparent;
                continue;
            }

            let node_is_left = unsafe { parent.as_ref().left } == Some(node);
            let mut effective_parent = parent;
            if parent_is_left != node_is_left {
                if node_is_left {
                    self.rotate_right(parent);
                } else {
                    self.rotate_left(parent);
                }
                effective_parent = if parent_is_left {
                    unsafe { grandparent.as_ref().left }.unwrap()
                } else {
                    unsafe { grandparent.as_ref().right }.unwrap()
                };
            }

            if parent_is_left {
                self.rotate_right(grandparent);
            } else {
                self.rotate_left(grandparent);
            }
            unsafe {
                (*effective_parent.as_ptr()).color = Color::Black;
                (*grandparent.as_ptr()).color = Color::Red;
            }
            return;
        }
    }

    /// Swaps the tree positions (children, color, parent linkage) of `first`
    /// and `second`, where `second` is `first`'s in-order successor (so it is
    /// strictly deeper, with no left child). Used by two-child deletion.
    ///
    /// Correctly handles the case where `second` is `first`'s direct right
    /// child (the naive "exchange fields" approach used by some textbook
    /// presentations creates a self-referential child pointer in exactly
    /// that case).
    fn swap_nodes(&mut self, first: NonNull<Node>, second: NonNull<Node>) {
        unsafe {
            let first_parent = first.as_ref().parent;
            let first_is_left = first_parent.map(|p| p.as_ref().left == Some(first));
            let first_color = first.as_ref().color;
            let first_left = first.as_ref().left;
            let first_right = first.as_ref().right;

            let second_parent = second.as_ref().parent.expect("successor always has a parent");
            let second_is_left = second_parent.as_ref().left == Some(second);
            let second_color = second.as_ref().color;
            let second_left = second.as_ref().left;
            let second_right = second.as_ref().right;

            let second_is_direct_child = first_right == Some(second);

            (*second.as_ptr()).parent = first_parent;
            (*second.as_ptr()).color = first_color;
            (*second.as_ptr()).left = first_left;
            if let Some(l) = first_left {
                (*l.as_ptr()).parent = Some(second);
            }
            if second_is_direct_child {
                (*second.as_ptr()).right = Some(first);
            } else {
                (*second.as_ptr()).right = first_right;
                if let Some(r) = first_right {
                    (*r.as_ptr()).parent = Some(second);
                }
            }
            match first_parent {
                None => self.root = Some(second),
                Some(p) => {
                    if first_is_left == Some(true) {
                        (*p.as_ptr()).left = Some(second);
                    } else {
                        (*p.as_ptr()).right = Some(second);
                    }
                }
            }

            (*first.as_ptr()).color = second_color;
            (*first.as_ptr()).left = second_left;
            if let Some(l) = second_left {
                (*l.as_ptr()).parent = Some(first);
            }
            (*first.as_ptr()).right = second_right;
            if let Some(r) = second_right {
                (*r.as_ptr()).parent = Some(first);
            }
            if second_is_direct_child {
                (*first.as_ptr()).parent = Some(second);
            } else {
                (*first.as_ptr()).parent = Some(second_parent);
                if second_is_left {
                    (*second_parent.as_ptr()).left = Some(first);
                } else {
                    (*second_parent.as_ptr()).right = Some(first);
                }
            }
        }
    }

    /// Full red-black deletion of a tree-slot node with an empty duplicate
    /// chain. Iterative: the two-child case swaps with the in-order
    /// successor and falls through to the at-most-one-child cases.
    fn remove_node(&mut self, node: NonNull<Node>) {
        unsafe {
            let node = if node.as_ref().left.is_some() && node.as_ref().right.is_some() {
                let mut successor = node.as_ref().right.unwrap();
                while let Some(l) = successor.as_ref().left {
                    successor = l;
                }
                self.swap_nodes(node, successor);
                node
            } else {
                node
            };

            if let Some(child) = node.as_ref().left {
                self.replace_with_only_child(node, child);
                return;
            }
            if let Some(child) = node.as_ref().right {
                self.replace_with_only_child(node, child);
                return;
            }

            let parent = match node.as_ref().parent {
                Some(p) => p,
                None => {
                    self.root = None;
                    return;
                }
            };

            if node.as_ref().color == Color::Red {
                if parent.as_ref().left == Some(node) {
                    (*parent.as_ptr()).left = None;
                } else {
                    (*parent.as_ptr()).right = None;
                }
                return;
            }

            let dir = if parent.as_ref().left == Some(node) {
                (*parent.as_ptr()).left = None;
                Direction::Left
            } else {
                (*parent.as_ptr()).right = None;
                Direction::Right
            };
            self.fix_delete(parent, dir);
        }
    }

    /// A black node with exactly one child always has a red child with no
    /// grandchildren (the only shape consistent with equal black-height);
    /// repainting the child black restores the invariant with no further
    /// rebalancing.
    fn replace_with_only_child(&mut self, node: NonNull<Node>, child: NonNull<Node>) {
        unsafe {
            let parent = node.as_ref().parent;
            (*child.as_ptr()).color = Color::Black;
            (*child.as_ptr()).parent = parent;
            match parent {
                None => self.root = Some(child),
                Some(p) => {
                    if p.as_ref().left == Some(node) {
                        (*p.as_ptr()).left = Some(child);
                    } else {
                        (*p.as_ptr()).right = Some(child);
                    }
                }
            }
        }
    }

    fn fix_delete(&mut self, mut parent: NonNull<Node>, mut dir: Direction) {
        unsafe {
            loop {
                let sibling = match dir {
                    Direction::Left => parent.as_ref().right,
                    Direction::Right => parent.as_ref().left,
                };
                let (mut close_nephew, mut distant_nephew) = match sibling {
                    Some(s) => match dir {
                        Direction::Left => (s.as_ref().left, s.as_ref().right),
                        Direction::Right => (s.as_ref().right, s.as_ref().left),
                    },
                    None => (None, None),
                };

                let parent_black = parent.as_ref().color == Color::Black;
                let sibling_black = color_of(sibling) == Color::Black;
                let close_black = color_of(close_nephew) == Color::Black;
                let distant_black = color_of(distant_nephew) == Color::Black;

                if parent_black && sibling_black && close_black && distant_black {
                    // Case #2: recolor sibling red and move the deficit up.
                    if let Some(s) = sibling {
                        (*s.as_ptr()).color = Color::Red;
                    }
                    let node = parent;
                    match node.as_ref().parent {
                        None => return, // Case #1: deficit absorbed at the root.
                        Some(gp) => {
                            dir = if gp.as_ref().left == Some(node) {
                                Direction::Left
                            } else {
                                Direction::Right
                            };
                            parent = gp;
                            continue;
                        }
                    }
                }

                let mut sibling = sibling;

                if !sibling_black {
                    // Case #3: red sibling; rotate it out of the way.
                    let s = sibling.unwrap();
                    match dir {
                        Direction::Left => self.rotate_left(parent),
                        Direction::Right => self.rotate_right(parent),
                    }
                    (*parent.as_ptr()).color = Color::Red;
                    (*s.as_ptr()).color = Color::Black;

                    sibling = close_nephew;
                    let new_sibling = sibling.unwrap();
                    match dir {
                        Direction::Left => {
                            close_nephew = new_sibling.as_ref().left;
                            distant_nephew = new_sibling.as_ref().right;
                        }
                        Direction::Right => {
                            close_nephew = new_sibling.as_ref().right;
                            distant_nephew = new_sibling.as_ref().left;
                        }
                    }
                }

                let close_black = color_of(close_nephew) == Color::Black;
                let distant_black = color_of(distant_nephew) == Color::Black;

                if close_black && distant_black {
                    // Case #4: parent absorbs the deficit.
                    (*parent.as_ptr()).color = Color::Black;
                    if let Some(s) = sibling {
                        (*s.as_ptr()).color = Color::Red;
                    }
                    return;
                }

                if distant_black && !close_black {
                    // Case #5: close nephew is red; rotate at the sibling.
                    let s = sibling.unwrap();
                    let cn = close_nephew.unwrap();
                    match dir {
                        Direction::Left => self.rotate_right(s),
                        Direction::Right => self.rotate_left(s),
                    }
                    (*cn.as_ptr()).color = Color::Black;
                    (*s.as_ptr()).color = Color::Red;

                    sibling = Some(cn);
                    distant_nephew = match dir {
                        Direction::Left => cn.as_ref().right,
                        Direction::Right => cn.as_ref().left,
                    };
                }

                // Case #6: distant nephew is red; rotate at the parent and
                // finish.
                let s = sibling.unwrap();
                let dn = distant_nephew.unwrap();
                match dir {
                    Direction::Left => self.rotate_left(parent),
                    Direction::Right => self.rotate_right(parent),
                }
                (*s.as_ptr()).color = parent.as_ref().color;
                (*parent.as_ptr()).color = Color::Black;
                (*dn.as_ptr()).color = Color::Black;
                return;
            }
        }
    }

    /// Checks P5/P6-style invariants: valid BST-on-size ordering, no
    /// red-red violations, equal black-height on every root-to-leaf path,
    /// and every tree node free with `used_size == 0`. Intended for tests
    /// and debug assertions, not the hot path.
    pub fn check_invariants(&self) -> Result<(), String> {
        fn walk(
            node: Option<NonNull<Node>>,
            parent: Option<NonNull<Node>>,
            lo: Option<usize>,
            hi: Option<usize>,
        ) -> Result<usize, String> {
            let Some(node) = node else {
                return Ok(1); // nil counts as black
            };
            unsafe {
                if node.as_ref().parent != parent {
                    return Err("parent pointer mismatch".into());
                }
                if node.as_ref().occupied || node.as_ref().used_size != 0 {
                    return Err("occupied node found inside free-size index".into());
                }
                let size = node.as_ref().size;
                if let Some(lo) = lo {
                    if size < lo {
                        return Err("BST ordering violated (too small)".into());
                    }
                }
                if let Some(hi) = hi {
                    if size > hi {
                        return Err("BST ordering violated (too large)".into());
                    }
                }
                if node.as_ref().color == Color::Red {
                    if color_of(node.as_ref().left) == Color::Red
                        || color_of(node.as_ref().right) == Color::Red
                    {
                        return Err("red node with a red child".into());
                    }
                }
                let left_bh = walk(node.as_ref().left, Some(node), lo, Some(size))?;
                let right_bh = walk(node.as_ref().right, Some(node), Some(size), hi)?;
                if left_bh != right_bh {
                    return Err(format!(
                        "black-height mismatch: left={} right={}",
                        left_bh, right_bh
                    ));
                }
                let own = if node.as_ref().color == Color::Black { 1 } else { 0 };
                Ok(left_bh + own)
            }
        }

        if let Some(root) = self.root {
            unsafe {
                if root.as_ref().parent.is_some() {
                    return Err("root has a parent".into());
                }
                if root.as_ref().color != Color::Black {
                    return Err("root is not black".into());
                }
            }
        }
        walk(self.root, None, None, None)?;
        Ok(())
    }

    /// Human-readable recursive dump, matching the shape of the source's
    /// `RBT_Dump`: one line per node with its color, size, duplicate count,
    /// and address, indented by depth.
    pub fn dump(&self, out: &mut String) {
        use std::fmt::Write;
        fn dump_node(node: NonNull<Node>, indent: usize, out: &mut String) {
            use std::fmt::Write;
            let n = unsafe { node.as_ref() };
            let color = if n.color == Color::Red { "Red" } else { "Black" };
            let mut dup_count = 1i64;
            let mut next = n.dup_next;
            while let Some(d) = next {
                dup_count += 1;
                next = unsafe { d.as_ref().dup_next };
            }
            let _ = writeln!(
                out,
                "{:indent$}{}(size={}, count={}, ptr={:p})",
                "",
                color,
                n.size,
                dup_count,
                node.as_ptr(),
                indent = indent
            );
            match n.left {
                Some(l) => dump_node(l, indent + 2, out),
                None => {
                    let _ = writeln!(out, "{:indent$}None", "", indent = indent + 2);
                }
            }
            match n.right {
                Some(r) => dump_node(r, indent + 2, out),
                None => {
                    let _ = writeln!(out, "{:indent$}None", "", indent = indent + 2);
                }
            }
        }

        match self.root {
            Some(root) => dump_node(root, 0, out),
            None => {
                let _ = writeln!(out, "Tree is empty");
            }
        }
    }
}

impl Default for FreeSizeIndex {
    fn default() -> Self {
        Self::new()
    }
}
