/// A position inside a tensor: the flat row-major `index` and the
/// per-axis `coords` it decodes to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Coordinate {
    pub index: usize,
    pub coords: Vec<usize>,
}

/// Lazy iterator over every [Coordinate] of a shape, in buffer order.
///
/// Each call to [crate::tensor::Tensor::coord_stream] starts a fresh stream,
/// and the stream itself is `Clone`, so it can be restarted or replayed.
#[derive(Debug, Clone)]
pub struct CoordStream {
    dims: Vec<usize>,
    current: Vec<usize>,
    index: usize,
    len: usize,
}

impl CoordStream {
    pub fn new(dims: &[usize]) -> Self {
        Self {
            dims: dims.to_vec(),
            current: vec![0; dims.len()],
            index: 0,
            len: dims.iter().product(),
        }
    }
}

impl Iterator for CoordStream {
    type Item = Coordinate;

    fn next(&mut self) -> Option<Coordinate> {
        if self.index >= self.len {
            return None;
        }
        let item = Coordinate {
            index: self.index,
            coords: self.current.clone(),
        };
        self.index += 1;
        // odometer increment, last axis fastest
        for axis in (0..self.dims.len()).rev() {
            self.current[axis] += 1;
            if self.current[axis] < self.dims[axis] {
                break;
            }
            self.current[axis] = 0;
        }
        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.len - self.index;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for CoordStream {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coord_stream_order() {
        let coords: Vec<_> = CoordStream::new(&[2, 3]).map(|c| c.coords).collect();
        assert_eq!(
            coords,
            vec![
                vec![0, 0],
                vec![0, 1],
                vec![0, 2],
                vec![1, 0],
                vec![1, 1],
                vec![1, 2],
            ]
        );
    }

    #[test]
    fn test_coord_stream_is_finite_and_restartable() {
        let stream = CoordStream::new(&[2, 2, 2]);
        assert_eq!(stream.len(), 8);
        let replay = stream.clone();
        assert_eq!(stream.count(), 8);
        let indices: Vec<_> = replay.map(|c| c.index).collect();
        assert_eq!(indices, (0..8).collect::<Vec<_>>());
    }

    #[test]
    fn test_coord_stream_empty_shape() {
        let all: Vec<_> = CoordStream::new(&[]).collect();
        assert_eq!(all.len(), 1);
        assert!(all[0].coords.is_empty());
        assert_eq!(CoordStream::new(&[3, 0]).count(), 0);
    }
}
