//! Basic-block control-flow graph over a method body

use std::ops::Range;

use super::instruction::Instruction;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u32);

impl BlockId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone)]
pub struct Block {
    pub id: BlockId,
    /// Instruction range `[start, end)` of this block
    pub start: usize,
    pub end: usize,
    pub succs: Vec<BlockId>,
    pub preds: Vec<BlockId>,
}

impl Block {
    pub fn insns(&self) -> Range<usize> {
        self.start..self.end
    }
}

/// Non-editable CFG. Block 0 is the entry block and holds the parameter loads.
#[derive(Debug, Clone)]
pub struct ControlFlowGraph {
    blocks: Vec<Block>,
}

impl ControlFlowGraph {
    /// Split the instruction list at branch targets and after terminators
    pub fn build(instructions: &[Instruction]) -> Self {
        let len = instructions.len();
        let mut leaders = vec![false; len + 1];
        leaders[0] = true;
        for (idx, insn) in instructions.iter().enumerate() {
            if let Some(target) = insn.branch_target() {
                if target.index() < len {
                    leaders[target.index()] = true;
                }
            }
            if insn.ends_block() {
                leaders[idx + 1] = true;
            }
        }

        let starts: Vec<usize> = (0..len).filter(|&i| leaders[i]).collect();
        let mut blocks: Vec<Block> = Vec::with_capacity(starts.len().max(1));
        let mut block_of = vec![BlockId(0); len];
        for (pos, &start) in starts.iter().enumerate() {
            let end = starts.get(pos + 1).copied().unwrap_or(len);
            let id = BlockId(pos as u32);
            for slot in &mut block_of[start..end] {
                *slot = id;
            }
            blocks.push(Block {
                id,
                start,
                end,
                succs: Vec::new(),
                preds: Vec::new(),
            });
        }
        if blocks.is_empty() {
            blocks.push(Block {
                id: BlockId(0),
                start: 0,
                end: 0,
                succs: Vec::new(),
                preds: Vec::new(),
            });
            return Self { blocks };
        }

        let block_count = blocks.len();
        for pos in 0..block_count {
            let last = &instructions[blocks[pos].end - 1];
            let mut succs = Vec::new();
            if last.falls_through() && pos + 1 < block_count {
                succs.push(BlockId(pos as u32 + 1));
            }
            if let Some(target) = last.branch_target() {
                if target.index() < len {
                    let target_block = block_of[target.index()];
                    if !succs.contains(&target_block) {
                        succs.push(target_block);
                    }
                }
            }
            blocks[pos].succs = succs;
        }
        for pos in 0..block_count {
            let succs = blocks[pos].succs.clone();
            for succ in succs {
                blocks[succ.index()].preds.push(BlockId(pos as u32));
            }
        }

        Self { blocks }
    }

    pub fn entry(&self) -> BlockId {
        BlockId(0)
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.index()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::InsnId;

    #[test]
    fn test_straight_line_is_single_block() {
        let insns = vec![
            Instruction::LoadParam { dest: 0 },
            Instruction::Const { dest: 1, value: 3 },
            Instruction::Return { src: Some(1) },
        ];
        let cfg = ControlFlowGraph::build(&insns);
        assert_eq!(cfg.blocks().len(), 1);
        assert_eq!(cfg.block(cfg.entry()).insns(), 0..3);
    }

    #[test]
    fn test_diamond() {
        // 0: param; 1: if -> 4; 2: const; 3: goto 5; 4: const-null; 5: return
        let insns = vec![
            Instruction::LoadParam { dest: 0 },
            Instruction::If {
                src: 0,
                target: InsnId(4),
            },
            Instruction::Const { dest: 1, value: 1 },
            Instruction::Goto { target: InsnId(5) },
            Instruction::ConstNull { dest: 1 },
            Instruction::Return { src: Some(1) },
        ];
        let cfg = ControlFlowGraph::build(&insns);
        assert_eq!(cfg.blocks().len(), 4);
        assert_eq!(cfg.block(BlockId(0)).succs, vec![BlockId(1), BlockId(2)]);
        assert_eq!(cfg.block(BlockId(1)).succs, vec![BlockId(3)]);
        assert_eq!(cfg.block(BlockId(2)).succs, vec![BlockId(3)]);
        assert_eq!(cfg.block(BlockId(3)).preds, vec![BlockId(1), BlockId(2)]);
    }

    #[test]
    fn test_loop_back_edge() {
        let insns = vec![
            Instruction::LoadParam { dest: 0 },
            Instruction::Const { dest: 1, value: 0 },
            Instruction::If {
                src: 0,
                target: InsnId(1),
            },
            Instruction::Return { src: None },
        ];
        let cfg = ControlFlowGraph::build(&insns);
        // [0], [1,2], [3]
        assert_eq!(cfg.blocks().len(), 3);
        assert_eq!(cfg.block(BlockId(1)).succs, vec![BlockId(2), BlockId(1)]);
        assert!(cfg.block(BlockId(1)).preds.contains(&BlockId(1)));
    }

    #[test]
    fn test_empty_body_has_entry_block() {
        let cfg = ControlFlowGraph::build(&[]);
        assert_eq!(cfg.blocks().len(), 1);
        assert!(cfg.block(cfg.entry()).insns().is_empty());
    }
}
