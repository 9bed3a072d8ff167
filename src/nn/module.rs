use crate::nn::{Embedding, LayerNorm, Linear};

/// A parameterised leaf reached while walking a module tree.
#[derive(Debug)]
pub enum Leaf<'a> {
    Linear(&'a Linear),
    Embedding(&'a Embedding),
    LayerNorm(&'a LayerNorm),
}

#[derive(Debug)]
pub enum LeafMut<'a> {
    Linear(&'a mut Linear),
    Embedding(&'a mut Embedding),
    LayerNorm(&'a mut LayerNorm),
}

impl Leaf<'_> {
    pub fn num_parameters(&self) -> usize {
        match self {
            Leaf::Linear(l) => l.weight().len() + l.bias().map_or(0, |b| b.len()),
            Leaf::Embedding(e) => e.weight().len(),
            Leaf::LayerNorm(n) => n.weight().len() + n.bias().len(),
        }
    }
}

/// Modules expose their leaves so that initialisers and counters can walk them.
pub trait Module {
    fn visit(&self, f: &mut dyn FnMut(Leaf<'_>));

    fn visit_mut(&mut self, f: &mut dyn FnMut(LeafMut<'_>));

    fn num_parameters(&self) -> usize {
        let mut total = 0;
        self.visit(&mut |leaf: Leaf<'_>| total += leaf.num_parameters());
        total
    }
}

impl<M: Module> Module for Option<M> {
    fn visit(&self, f: &mut dyn FnMut(Leaf<'_>)) {
        if let Some(m) = self {
            m.visit(f);
        }
    }

    fn visit_mut(&mut self, f: &mut dyn FnMut(LeafMut<'_>)) {
        if let Some(m) = self {
            m.visit_mut(f);
        }
    }
}

impl<M: Module> Module for Vec<M> {
    fn visit(&self, f: &mut dyn FnMut(Leaf<'_>)) {
        for m in self {
            m.visit(f);
        }
    }

    fn visit_mut(&mut self, f: &mut dyn FnMut(LeafMut<'_>)) {
        for m in self {
            m.visit_mut(f);
        }
    }
}
