use std::fmt;

use crate::symbols::is_factored_name;

/// Label given to constituents a decoder chose not to name; removed by `unfactor`.
pub const NULL_LABEL: &str = "<null>";

#[derive(Debug, PartialEq, Clone)]
pub struct Constituent<T> {
  pub value: T,
  pub span: (usize, usize),
}

impl<T> fmt::Display for Constituent<T>
where
  T: fmt::Display,
{
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}..{}: {}", self.span.0, self.span.1, self.value)
  }
}

#[derive(Debug, PartialEq, Clone)]
pub struct Word<U> {
  pub value: U,
  pub span: (usize, usize),
}

impl<U> fmt::Display for Word<U>
where
  U: fmt::Display,
{
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}..{}: {}", self.span.0, self.span.1, self.value)
  }
}

#[derive(Debug, PartialEq, Clone)]
pub enum SynTree<T, U> {
  Branch(Constituent<T>, Vec<SynTree<T, U>>),
  Leaf(Word<U>),
}

impl<T, U> SynTree<T, U> {
  pub fn leaf(value: U, position: usize) -> Self {
    Self::Leaf(Word {
      value,
      span: (position, position + 1),
    })
  }

  /// A branch spanning from its first child's start to its last child's end.
  pub fn branch(value: T, children: Vec<SynTree<T, U>>) -> Self {
    let start = children.first().map_or(0, |c| c.span().0);
    let end = children.last().map_or(start, |c| c.span().1);
    Self::Branch(
      Constituent {
        value,
        span: (start, end),
      },
      children,
    )
  }

  pub fn get_branch(&self) -> Option<(&Constituent<T>, &Vec<SynTree<T, U>>)> {
    match self {
      Self::Branch(c, cs) => Some((c, cs)),
      _ => None,
    }
  }

  pub fn span(&self) -> (usize, usize) {
    match self {
      Self::Branch(c, _) => c.span,
      Self::Leaf(w) => w.span,
    }
  }

  /// The words under this tree, left to right.
  pub fn leaves(&self) -> Vec<&U> {
    let mut out = Vec::new();
    self.collect_leaves(&mut out);
    out
  }

  fn collect_leaves<'a>(&'a self, out: &mut Vec<&'a U>) {
    match self {
      Self::Leaf(w) => out.push(&w.value),
      Self::Branch(_, children) => children.iter().for_each(|c| c.collect_leaves(out)),
    }
  }

  /// Number of branch nodes.
  pub fn num_constituents(&self) -> usize {
    match self {
      Self::Leaf(_) => 0,
      Self::Branch(_, children) => 1 + children.iter().map(Self::num_constituents).sum::<usize>(),
    }
  }
}

impl SynTree<String, String> {
  pub fn label(&self) -> Option<&str> {
    self.get_branch().map(|(c, _)| c.value.as_str())
  }

  /// Splices factored (`@...`) and null-labelled constituents into their parents.
  /// The root is always kept.
  pub fn unfactor(self) -> Self {
    match self {
      Self::Branch(c, children) => Self::Branch(
        c,
        children.into_iter().flat_map(Self::splice_unlabelled).collect(),
      ),
      leaf => leaf,
    }
  }

  fn splice_unlabelled(self) -> Vec<Self> {
    match self {
      Self::Branch(c, children) => {
        let children = children
          .into_iter()
          .flat_map(Self::splice_unlabelled)
          .collect::<Vec<_>>();
        if c.value == NULL_LABEL || is_factored_name(&c.value) {
          children
        } else {
          vec![Self::Branch(c, children)]
        }
      }
      leaf => vec![leaf],
    }
  }
}

/// Bracketed form: `(S (NP (DT the)(NN dog))(VP (VB barks)))`.
impl<T, U> fmt::Display for SynTree<T, U>
where
  T: fmt::Display,
  U: fmt::Display,
{
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Leaf(w) => write!(f, "{}", w.value),
      Self::Branch(c, children) => {
        write!(f, "({} ", c.value)?;
        for child in children.iter() {
          write!(f, "{}", child)?;
        }
        write!(f, ")")
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn t(label: &str, children: Vec<SynTree<String, String>>) -> SynTree<String, String> {
    SynTree::branch(label.to_string(), children)
  }

  fn w(word: &str, pos: usize) -> SynTree<String, String> {
    SynTree::leaf(word.to_string(), pos)
  }

  #[test]
  fn formats_brackets() {
    let tree = t(
      "S",
      vec![
        t("NP", vec![t("DT", vec![w("the", 0)]), t("NN", vec![w("dog", 1)])]),
        t("VP", vec![t("VB", vec![w("barks", 2)])]),
      ],
    );
    assert_eq!(tree.to_string(), "(S (NP (DT the)(NN dog))(VP (VB barks)))");
    assert_eq!(tree.span(), (0, 3));
    assert_eq!(tree.leaves(), vec!["the", "dog", "barks"]);
    assert_eq!(tree.num_constituents(), 6);
  }

  #[test]
  fn unfactor_splices_artifacts() {
    let tree = t(
      "S",
      vec![
        t("A", vec![w("a", 0)]),
        t(
          "@S|B|C",
          vec![t("B", vec![w("b", 1)]), t(NULL_LABEL, vec![t("C", vec![w("c", 2)])])],
        ),
      ],
    );
    let flat = tree.unfactor();
    assert_eq!(flat.to_string(), "(S (A a)(B b)(C c))");
    assert_eq!(flat.leaves(), vec!["a", "b", "c"]);
  }
}
