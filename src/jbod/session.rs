//! 会话状态: 挂载标志和写权限标志, 决定卷驱动的入口是否可用.
//!
//! 每个操作都是一次原子的标志切换: 先检查标志, 再向 JBOD 发出对应的命令,
//! 只有命令成功时才修改标志. 失败不重试, 标志保持原值.

use log::info;

use super::{Command, JbodError, Opcode, Result, Transport};

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct Session {
    mounted: bool,
    write_permitted: bool,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted
    }

    pub fn is_write_permitted(&self) -> bool {
        self.write_permitted
    }

    pub fn mount(&mut self, transport: &mut impl Transport) -> Result<()> {
        if self.mounted {
            return Err(JbodError::AlreadyMounted);
        }
        transport.execute(Opcode::bare(Command::Mount), None)?;
        self.mounted = true;
        info!("volume mounted");
        Ok(())
    }

    pub fn unmount(&mut self, transport: &mut impl Transport) -> Result<()> {
        if !self.mounted {
            return Err(JbodError::NotMounted);
        }
        transport.execute(Opcode::bare(Command::Unmount), None)?;
        self.mounted = false;
        info!("volume unmounted");
        Ok(())
    }

    pub fn grant_write(&mut self, transport: &mut impl Transport) -> Result<()> {
        if self.write_permitted {
            return Err(JbodError::AlreadyWritable);
        }
        transport.execute(Opcode::bare(Command::WritePermission), None)?;
        self.write_permitted = true;
        info!("write permission granted");
        Ok(())
    }

    pub fn revoke_write(&mut self, transport: &mut impl Transport) -> Result<()> {
        if !self.write_permitted {
            return Err(JbodError::WriteNotPermitted);
        }
        transport.execute(Opcode::bare(Command::RevokeWritePermission), None)?;
        self.write_permitted = false;
        info!("write permission revoked");
        Ok(())
    }
}
