use loom_tensor::Tensor;

use crate::Parameter;

/// A layer that maps one `(batch, features)` tensor to another and can
/// propagate gradients back through its last forward call.
pub trait Module {
    /// Forward pass. Caches whatever backward needs.
    fn forward(&mut self, input: &Tensor) -> Tensor;

    /// Backward pass: gradient w.r.t. output -> gradient w.r.t. input.
    /// Adds parameter gradients into each parameter's buffer.
    fn backward(&mut self, grad_output: &Tensor) -> Tensor;

    fn parameters(&self) -> Vec<&Parameter>;

    fn parameters_mut(&mut self) -> Vec<&mut Parameter>;

    /// Parameters with stable names, in the same order as `parameters`.
    fn named_parameters(&self) -> Vec<(String, &Parameter)> {
        self.parameters()
            .into_iter()
            .enumerate()
            .map(|(i, p)| (i.to_string(), p))
            .collect()
    }

    fn zero_grad(&mut self) {
        for p in self.parameters_mut() {
            p.zero_grad();
        }
    }

    /// Switch between training and evaluation behaviour (dropout).
    fn set_training(&mut self, _training: bool) {}
}

/// A layer over a time-major sequence: `T` tensors of `(batch, features)`.
pub trait TimeModule {
    fn forward(&mut self, xs: &[Tensor]) -> Vec<Tensor>;

    /// Zeroes the parameter gradients, then accumulates the gradient of
    /// every step into them.
    fn backward(&mut self, dys: &[Tensor]) -> Vec<Tensor>;

    fn parameters(&self) -> Vec<&Parameter>;

    fn parameters_mut(&mut self) -> Vec<&mut Parameter>;

    fn named_parameters(&self) -> Vec<(String, &Parameter)>;

    fn zero_grad(&mut self) {
        for p in self.parameters_mut() {
            p.zero_grad();
        }
    }

    fn set_training(&mut self, _training: bool) {}
}

/// A whole model: its parameters by name, in one fixed order.
///
/// Checkpoints save and restore through this order, and
/// [`summary`](Self::summary) reports it layer by layer.
pub trait ParameterSet {
    fn named_parameters(&self) -> Vec<(String, &Parameter)>;

    fn parameters_mut(&mut self) -> Vec<&mut Parameter>;

    /// One header line with the model type and parameter count, then one
    /// line per layer listing its parameter shapes and element count:
    ///
    /// ```text
    /// Sequential: 65 parameters
    /// 0: weight(2, 16) bias(1, 16): 48
    /// 2: weight(16, 1) bias(1, 1): 17
    /// ```
    fn summary(&self) -> Vec<String> {
        let named = self.named_parameters();
        let total: usize = named.iter().map(|(_, p)| p.numel()).sum();
        let mut lines = vec![format!("{}: {total} parameters", short_type_name::<Self>())];

        // Consecutive parameters sharing a name prefix belong to one layer.
        let mut layers: Vec<(&str, Vec<String>, usize)> = Vec::new();
        for (name, p) in &named {
            let (scope, leaf) = name.rsplit_once('.').unwrap_or(("", name.as_str()));
            let (rows, cols) = p.shape();
            let entry = format!("{leaf}({rows}, {cols})");
            match layers.last_mut() {
                Some((current, entries, count)) if *current == scope => {
                    entries.push(entry);
                    *count += p.numel();
                }
                _ => layers.push((scope, vec![entry], p.numel())),
            }
        }
        for (scope, entries, count) in layers {
            let shapes = entries.join(" ");
            if scope.is_empty() {
                lines.push(format!("{shapes}: {count}"));
            } else {
                lines.push(format!("{scope}: {shapes}: {count}"));
            }
        }
        lines
    }
}

/// `std::any::type_name` with every module path dropped, generics included:
/// `a::b::Seq2Seq<a::b::Encoder, a::b::Decoder>` becomes
/// `Seq2Seq<Encoder, Decoder>`.
fn short_type_name<T: ?Sized>() -> String {
    let mut out = String::new();
    let mut word = String::new();
    let mut chars = std::any::type_name::<T>().chars().peekable();
    while let Some(ch) = chars.next() {
        if ch == ':' && chars.peek() == Some(&':') {
            chars.next();
            word.clear();
        } else if ch.is_alphanumeric() || ch == '_' {
            word.push(ch);
        } else {
            out.push_str(&word);
            word.clear();
            out.push(ch);
        }
    }
    out.push_str(&word);
    out
}

/// Prefix every name with `scope.`.
pub(crate) fn scoped<'a>(
    scope: &str,
    params: Vec<(String, &'a Parameter)>,
) -> impl Iterator<Item = (String, &'a Parameter)> {
    let scope = scope.to_string();
    params
        .into_iter()
        .map(move |(name, p)| (format!("{scope}.{name}"), p))
}
