// In-order traversal of one bucket's B-tree, yielding leaf elements by ascending key.
use crate::core::bolt::Db;
use crate::core::bolt::page::{LeafElement, Page};
use crate::core::error::{Error, ErrorKind};

// bbolt trees stay shallow; anything deeper is a page cycle.
const MAX_DEPTH: usize = 64;

#[derive(Debug)]
struct Frame<'a> {
    page: Page<'a>,
    index: usize,
}

#[derive(Debug)]
pub struct Cursor<'a> {
    db: &'a Db,
    stack: Vec<Frame<'a>>,
}

impl<'a> Cursor<'a> {
    pub(crate) fn new(db: &'a Db, root: Page<'a>) -> Self {
        Self {
            db,
            stack: vec![Frame {
                page: root,
                index: 0,
            }],
        }
    }

    fn step(&mut self) -> Result<Option<LeafElement<'a>>, Error> {
        loop {
            let Some(frame) = self.stack.last_mut() else {
                return Ok(None);
            };
            let page = frame.page;
            if frame.index >= page.count as usize {
                self.stack.pop();
                continue;
            }
            let index = frame.index;
            frame.index += 1;

            if page.is_leaf() {
                return page.leaf_element(index).map(Some);
            }
            if !page.is_branch() {
                return Err(Error::new(ErrorKind::Corrupt)
                    .with_message("unexpected page type in bucket tree")
                    .with_page(page.id)
                    .with_path(self.db.path()));
            }

            let child = page.branch_element(index)?.child;
            if self.stack.len() >= MAX_DEPTH {
                return Err(Error::new(ErrorKind::Corrupt)
                    .with_message("bucket tree too deep")
                    .with_page(child)
                    .with_path(self.db.path()));
            }
            let page = self.db.page(child)?;
            self.stack.push(Frame { page, index: 0 });
        }
    }
}

impl<'a> Iterator for Cursor<'a> {
    type Item = Result<LeafElement<'a>, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.step() {
            Ok(Some(element)) => Some(Ok(element)),
            Ok(None) => None,
            Err(err) => {
                // A broken tree cannot be resumed.
                self.stack.clear();
                Some(Err(err))
            }
        }
    }
}
