//! Cursor over the extracted images.
//!
//! The navigator only knows positions. After every successful move the
//! caller loads the current image's annotation from
//! [`crate::annotation::AnnotationStore`]; nothing annotation-related is
//! cached here, so there is nothing to go stale.

use crate::error::CyzError;

/// Ordered snapshot of image names plus a cursor.
///
/// Invariant: `index < images.len()` whenever `images` is non-empty;
/// `index` is `None` exactly when `images` is empty.
#[derive(Debug, Clone, Default)]
pub struct ArtifactNavigator {
    images: Vec<String>,
    index: Option<usize>,
}

impl ArtifactNavigator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the list and put the cursor on the first image.
    ///
    /// The previous list is discarded, not merged.
    pub fn start<I, S>(&mut self, images: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.images = images.into_iter().map(Into::into).collect();
        self.index = if self.images.is_empty() { None } else { Some(0) };
    }

    /// The image under the cursor.
    pub fn current(&self) -> Option<&str> {
        self.index.map(|i| self.images[i].as_str())
    }

    /// Cursor position.
    pub fn position(&self) -> Option<usize> {
        self.index
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn images(&self) -> &[String] {
        &self.images
    }

    /// Jump to `index`.
    ///
    /// Signed so that callers forwarding raw user input get `OutOfRange`
    /// for negatives instead of a wrap-around.
    pub fn move_to(&mut self, index: isize) -> Result<(), CyzError> {
        let len = self.images.len();
        match usize::try_from(index) {
            Ok(i) if i < len => {
                self.index = Some(i);
                Ok(())
            }
            _ => Err(CyzError::OutOfRange { index, len }),
        }
    }

    /// Step forward; returns whether the cursor moved.
    pub fn next(&mut self) -> bool {
        match self.index {
            Some(i) if i + 1 < self.images.len() => {
                self.index = Some(i + 1);
                true
            }
            _ => false,
        }
    }

    /// Step back; returns whether the cursor moved.
    pub fn previous(&mut self) -> bool {
        match self.index {
            Some(i) if i > 0 => {
                self.index = Some(i - 1);
                true
            }
            _ => false,
        }
    }

    pub fn has_next(&self) -> bool {
        self.index.is_some_and(|i| i + 1 < self.images.len())
    }

    pub fn has_previous(&self) -> bool {
        self.index.is_some_and(|i| i > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn three() -> ArtifactNavigator {
        let mut nav = ArtifactNavigator::new();
        nav.start(["a.tif", "b.tif", "c.tif"]);
        nav
    }

    #[test]
    fn start_points_at_first() {
        let nav = three();
        assert_eq!(nav.current(), Some("a.tif"));
        assert_eq!(nav.position(), Some(0));
        assert_eq!(nav.len(), 3);
        assert!(!nav.has_previous());
        assert!(nav.has_next());
    }

    #[test]
    fn move_to_bounds() {
        let mut nav = three();
        assert!(matches!(
            nav.move_to(-1),
            Err(CyzError::OutOfRange { index: -1, len: 3 })
        ));
        assert!(matches!(
            nav.move_to(3),
            Err(CyzError::OutOfRange { index: 3, len: 3 })
        ));
        assert_eq!(nav.position(), Some(0));

        nav.move_to(2).unwrap();
        assert_eq!(nav.current(), Some("c.tif"));
    }

    #[test]
    fn clamps_at_both_ends() {
        let mut nav = three();
        assert!(!nav.previous());
        assert_eq!(nav.position(), Some(0));

        assert!(nav.next());
        assert!(nav.next());
        assert!(!nav.next());
        assert_eq!(nav.position(), Some(2));
        assert!(!nav.has_next());

        assert!(nav.previous());
        assert_eq!(nav.current(), Some("b.tif"));
    }

    #[test]
    fn empty_list_has_no_current() {
        let mut nav = ArtifactNavigator::new();
        nav.start(Vec::<String>::new());
        assert_eq!(nav.current(), None);
        assert!(!nav.next());
        assert!(!nav.previous());
        assert_eq!(nav.position(), None);
        assert!(nav.move_to(0).is_err());
    }

    #[test]
    fn restart_discards_previous_list() {
        let mut nav = three();
        nav.move_to(2).unwrap();
        nav.start(["z.tif"]);
        assert_eq!(nav.images(), ["z.tif".to_string()]);
        assert_eq!(nav.position(), Some(0));
    }
}
