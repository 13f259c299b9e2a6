use std::collections::VecDeque;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Fifo<T> {
    inner: VecDeque<T>,
    min_size: Option<usize>,
    max_size: Option<usize>,
}

impl<T> std::iter::IntoIterator for Fifo<T> {
    type Item = T;
    type IntoIter = std::collections::vec_deque::IntoIter<Self::Item>;

    fn into_iter(self) -> Self::IntoIter {
        self.inner.into_iter()
    }
}

impl<T> std::fmt::Display for Fifo<T>
where
    T: std::fmt::Display,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Fifo({:>2}/{:<2}){:#?}",
            self.inner.len(),
            self.max_size
                .map(|max| max.to_string())
                .as_deref()
                .unwrap_or(""),
            self.inner
                .iter()
                .map(std::string::ToString::to_string)
                .collect::<Vec<_>>()
        )
    }
}

impl<T> Fifo<T> {
    #[must_use]
    pub fn new(min_size: Option<usize>, max_size: Option<usize>) -> Self {
        Self {
            inner: VecDeque::new(),
            min_size,
            max_size,
        }
    }

    #[must_use]
    pub fn iter(&self) -> std::collections::vec_deque::Iter<T> {
        self.inner.iter()
    }

    pub fn enqueue(&mut self, value: T) {
        self.inner.push_back(value);
    }

    /// Put a value back at the head, e.g. after a failed attempt to process it.
    pub fn enqueue_front(&mut self, value: T) {
        self.inner.push_front(value);
    }

    pub fn dequeue(&mut self) -> Option<T> {
        self.inner.pop_front()
    }

    #[must_use]
    pub fn first(&self) -> Option<&T> {
        self.inner.front()
    }

    #[must_use]
    pub fn full(&self) -> bool {
        match self.max_size {
            Some(max) => self.inner.len() >= max,
            None => false,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    #[must_use]
    pub fn can_fit(&self, n: usize) -> bool {
        match self.max_size {
            Some(max) => self.inner.len() + n <= max,
            None => true,
        }
    }

    #[must_use]
    pub fn max_size(&self) -> Option<usize> {
        self.max_size
    }

    #[must_use]
    pub fn min_size(&self) -> Option<usize> {
        self.min_size
    }
}

/// Fixed latency pipeline.
///
/// A value pushed in cycle `t` is returned by [`Pipeline::pop`] in cycle `t + latency`,
/// given the pipeline is popped once per cycle.
/// The pipeline accepts at most one value per cycle:
/// every pop refills bubbles up to a depth of `latency - 1`.
#[derive(Clone, Debug)]
pub struct Pipeline<T> {
    inner: VecDeque<Option<T>>,
    latency: usize,
}

impl<T> Pipeline<T> {
    #[must_use]
    pub fn new(latency: usize) -> Self {
        assert!(latency > 0, "pipeline latency must be at least one cycle");
        let mut inner = VecDeque::with_capacity(latency);
        inner.extend(std::iter::repeat_with(|| None).take(latency - 1));
        Self { inner, latency }
    }

    #[must_use]
    pub fn latency(&self) -> usize {
        self.latency
    }

    #[must_use]
    pub fn full(&self) -> bool {
        self.inner.len() >= self.latency
    }

    /// Number of values in flight.
    #[must_use]
    pub fn num_values(&self) -> usize {
        self.inner.iter().filter(|slot| slot.is_some()).count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.num_values() == 0
    }

    /// Values in flight, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        self.inner.iter().flatten()
    }

    pub fn push(&mut self, value: T) {
        assert!(!self.full(), "pipeline push while full");
        self.inner.push_back(Some(value));
    }

    /// Advance the pipeline by one cycle.
    ///
    /// Only pop if a consumer is ready, otherwise the pipeline stalls.
    pub fn pop(&mut self) -> Option<T> {
        let head = self.inner.pop_front().flatten();
        while self.inner.len() + 1 < self.latency {
            self.inner.push_back(None);
        }
        head
    }

    /// Change the latency for values pushed from now on.
    pub fn set_latency(&mut self, latency: usize) {
        assert!(latency > 0, "pipeline latency must be at least one cycle");
        if latency > self.latency {
            while self.inner.len() < latency - 1 {
                self.inner.push_back(None);
            }
        } else {
            // only leading bubbles are dropped, values in flight keep their spacing
            while self.inner.len() >= latency && matches!(self.inner.front(), Some(None)) {
                self.inner.pop_front();
            }
        }
        self.latency = latency;
    }
}
